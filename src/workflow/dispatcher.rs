//! 派发器与轮次缓冲
//!
//! 每个 ready 任务一个 tokio 任务；配置了 max_parallel 时由本轮自己的 Semaphore 限流。分支结束时把结果追加到
//! RoundBuffer，控制循环在屏障处等待，直到收到的结果数等于派发数。分支之间互不影响。

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::join_all;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

use crate::capability::{Invocation, ProviderExecutor};
use crate::workflow::events::{EngineEvent, EventSink};
use crate::workflow::{TaskId, TaskResult};

/// 本轮结果缓冲：只追加，Join 读取后清空
#[derive(Debug, Default)]
pub struct RoundBuffer {
    results: Mutex<Vec<TaskResult>>,
    notify: Notify,
}

impl RoundBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TaskResult>> {
        // 分支里只做 push，锁中毒时数据仍然完整
        self.results.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 追加一个结果，返回当前结果数
    pub fn push(&self, result: TaskResult) -> usize {
        let received = {
            let mut results = self.lock();
            results.push(result);
            results.len()
        };
        self.notify.notify_waiters();
        received
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 等待直到至少收到 expected 个结果
    pub async fn wait_for(&self, expected: usize) {
        loop {
            let notified = self.notify.notified();
            if self.len() >= expected {
                return;
            }
            notified.await;
        }
    }

    /// 取出全部结果并清空缓冲
    pub fn drain(&self) -> Vec<TaskResult> {
        std::mem::take(&mut *self.lock())
    }
}

/// 一轮派发的句柄
pub struct DispatchedRound {
    pub round: u32,
    pub task_ids: Vec<TaskId>,
    handles: Vec<(TaskId, JoinHandle<()>)>,
}

impl DispatchedRound {
    pub fn len(&self) -> usize {
        self.task_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_ids.is_empty()
    }
}

/// 派发器
///
/// 自身不持有跨会话的可变状态；限流信号量随每次 dispatch 新建。
#[derive(Clone)]
pub struct Dispatcher {
    executor: ProviderExecutor,
    /// 0 表示不限制
    max_parallel: usize,
    events: EventSink,
}

impl Dispatcher {
    pub fn new(executor: ProviderExecutor, max_parallel: usize, events: EventSink) -> Self {
        Self {
            executor,
            max_parallel,
            events,
        }
    }

    /// 为每个调用启动一个分支；同一任务 ID 在一轮内只派发一次
    pub fn dispatch(
        &self,
        round: u32,
        invocations: Vec<Invocation>,
        buffer: Arc<RoundBuffer>,
    ) -> DispatchedRound {
        let mut seen = HashSet::new();
        let invocations: Vec<Invocation> = invocations
            .into_iter()
            .filter(|inv| {
                let fresh = seen.insert(inv.task_id);
                if !fresh {
                    tracing::warn!(task_id = %inv.task_id, "Duplicate dispatch ignored");
                }
                fresh
            })
            .collect();

        let dispatched = invocations.len();
        let task_ids: Vec<TaskId> = invocations.iter().map(|inv| inv.task_id).collect();
        let mut handles = Vec::with_capacity(dispatched);
        let semaphore = (self.max_parallel > 0).then(|| Arc::new(Semaphore::new(self.max_parallel)));

        for invocation in invocations {
            let task_id = invocation.task_id;
            tracing::debug!(round, task_id = %task_id, capability = %invocation.capability, "Dispatching task");
            self.events.emit(EngineEvent::TaskDispatched {
                round,
                task_id,
                capability: invocation.capability.clone(),
            });

            let executor = self.executor.clone();
            let semaphore = semaphore.clone();
            let buffer = Arc::clone(&buffer);
            let events = self.events.clone();

            let handle = tokio::spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                let result = executor.invoke(invocation).await;
                let success = result.is_success();
                let received = buffer.push(result);
                events.emit(EngineEvent::TaskFinished {
                    round,
                    task_id,
                    success,
                    received,
                    dispatched,
                });
            });
            handles.push((task_id, handle));
        }

        DispatchedRound {
            round,
            task_ids,
            handles,
        }
    }

    /// 屏障：等所有分支结束并且缓冲中的结果数等于派发数
    pub async fn barrier(&self, dispatched: DispatchedRound, buffer: &RoundBuffer) {
        let expected = dispatched.task_ids.len();
        let (ids, handles): (Vec<TaskId>, Vec<JoinHandle<()>>) =
            dispatched.handles.into_iter().unzip();

        for (task_id, joined) in ids.into_iter().zip(join_all(handles).await) {
            // 分支本身被取消或崩溃时补一个 failed 结果，屏障才能满足
            if let Err(e) = joined {
                tracing::error!(task_id = %task_id, error = %e, "Dispatch branch aborted");
                buffer.push(TaskResult::failed(task_id, format!("branch aborted: {}", e)));
            }
        }

        buffer.wait_for(expected).await;
        tracing::debug!(round = dispatched.round, results = expected, "Barrier reached");
    }
}
