use std::time::Duration;

use tokio::time::{interval, Interval, MissedTickBehavior};

use crate::config::Periods;

/// Identifies which maintenance action a tick belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Task {
    DataExchange,
    PersistIndices,
    Autoexit,
    RecomputeIbdMode,
    CheckPeerLiveness,
    PingPeers,
    PrintNodeStatus,
}

struct Entry {
    task: Task,
    interval: Interval,
    once: bool,
}

/// A small registry of (interval, task, once?) entries, matching the
/// reference node's timer table. Entries with a zero period are omitted
/// entirely so they never fire.
pub struct Scheduler {
    entries: Vec<Entry>,
}

impl Scheduler {
    pub fn new(periods: &Periods) -> Self {
        let mut entries = Vec::new();
        let mut push = |task: Task, ms: u64, once: bool| {
            if ms == 0 {
                return;
            }
            let mut iv = interval(Duration::from_millis(ms));
            iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
            entries.push(Entry { task, interval: iv, once });
        };
        push(Task::DataExchange, periods.peer_data_exchange_ms, false);
        push(Task::PersistIndices, periods.save_indices_ms, false);
        push(Task::Autoexit, periods.autoexit_ms, true);
        push(Task::RecomputeIbdMode, periods.reset_ibd_mode_ms, false);
        push(Task::CheckPeerLiveness, periods.timeout_peers_ms, false);
        push(Task::PingPeers, periods.ping_ms, false);
        push(Task::PrintNodeStatus, periods.print_node_status_ms, false);
        Scheduler { entries }
    }

    /// Awaits the next due task. Once-only entries are dropped from the
    /// registry as soon as they fire, so they never spin the select loop
    /// again; a scheduler with no entries left simply never becomes ready.
    pub async fn tick(&mut self) -> Task {
        let (index, _) = futures_select(&mut self.entries).await;
        let task = self.entries[index].task;
        if self.entries[index].once {
            self.entries.remove(index);
        }
        task
    }
}

/// Polls every entry's interval concurrently and returns the index of
/// whichever fired first, without pulling in the `futures` crate for a
/// single `select_all`.
async fn futures_select(entries: &mut [Entry]) -> (usize, ()) {
    use std::future::poll_fn;
    use std::task::Poll;

    poll_fn(|cx| {
        for (index, entry) in entries.iter_mut().enumerate() {
            if entry.interval.poll_tick(cx).is_ready() {
                return Poll::Ready((index, ()));
            }
        }
        Poll::Pending
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn data_exchange_fires_before_persist() {
        let periods = Periods {
            peer_data_exchange_ms: 10,
            save_indices_ms: 1_000,
            autoexit_ms: 0,
            reset_ibd_mode_ms: 0,
            timeout_peers_ms: 0,
            ping_ms: 0,
            print_node_status_ms: 0,
        };
        let mut scheduler = Scheduler::new(&periods);
        let task = scheduler.tick().await;
        assert_eq!(task, Task::DataExchange);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_disables_entry() {
        let periods = Periods {
            peer_data_exchange_ms: 0,
            save_indices_ms: 0,
            autoexit_ms: 0,
            reset_ibd_mode_ms: 0,
            timeout_peers_ms: 0,
            ping_ms: 10,
            print_node_status_ms: 0,
        };
        let mut scheduler = Scheduler::new(&periods);
        assert_eq!(scheduler.entries.len(), 1);
        assert_eq!(scheduler.tick().await, Task::PingPeers);
    }

    #[tokio::test(start_paused = true)]
    async fn once_entry_fires_exactly_once() {
        let periods = Periods {
            peer_data_exchange_ms: 0,
            save_indices_ms: 0,
            autoexit_ms: 5,
            reset_ibd_mode_ms: 10_000,
            timeout_peers_ms: 0,
            ping_ms: 0,
            print_node_status_ms: 0,
        };
        let mut scheduler = Scheduler::new(&periods);
        assert_eq!(scheduler.tick().await, Task::Autoexit);
        assert_eq!(scheduler.tick().await, Task::RecomputeIbdMode);
    }
}
