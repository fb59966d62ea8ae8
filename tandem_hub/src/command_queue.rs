// Client-side scheduling queues for received commands.
//
// A peer never applies a command when it arrives; it files it to run at
// `issued_at + command_delay`. Barrier-affecting commands (long action
// schedule/end) and ordinary commands live in separate FIFOs because they
// are drained under different conditions (see `client_session.rs`).
//
// Within a queue, order is arrival order. The hub issues commands with
// non-decreasing ticks over an ordered stream, so arrival order is also due
// order and popping from the front is enough.

use std::collections::VecDeque;

use tandem_protocol::ScheduledCommand;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DueCommand {
    pub command: ScheduledCommand,
    /// The receiving peer asked for this command itself.
    pub originated_locally: bool,
    pub execute_at: u32,
}

#[derive(Debug, Default)]
pub struct CommandQueues {
    barrier: VecDeque<DueCommand>,
    ordinary: VecDeque<DueCommand>,
}

impl CommandQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// File a command for `issued_at + delay`.
    pub fn push(&mut self, command: ScheduledCommand, originated_locally: bool, delay: u32) {
        let due = DueCommand {
            execute_at: command.due_tick(delay),
            originated_locally,
            command,
        };
        if due.command.kind.affects_barrier() {
            self.barrier.push_back(due);
        } else {
            self.ordinary.push_back(due);
        }
    }

    /// Next barrier command due at or before `tick`.
    pub fn pop_barrier_due(&mut self, tick: u32) -> Option<DueCommand> {
        pop_due(&mut self.barrier, tick)
    }

    /// Next ordinary command due at or before `tick`.
    pub fn pop_ordinary_due(&mut self, tick: u32) -> Option<DueCommand> {
        pop_due(&mut self.ordinary, tick)
    }

    pub fn len(&self) -> usize {
        self.barrier.len() + self.ordinary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.barrier.is_empty() && self.ordinary.is_empty()
    }
}

fn pop_due(queue: &mut VecDeque<DueCommand>, tick: u32) -> Option<DueCommand> {
    if queue.front()?.execute_at <= tick {
        queue.pop_front()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_protocol::{CommandKind, FactionId, LongAction, UnitId};

    fn game(tick: u32, tag: u8) -> ScheduledCommand {
        ScheduledCommand::new(CommandKind::Game(1), tick, FactionId::NONE, UnitId(0), vec![tag])
    }

    #[test]
    fn commands_wait_for_the_delay() {
        let mut queues = CommandQueues::new();
        queues.push(game(100, 0), false, 15);
        assert_eq!(queues.pop_ordinary_due(114), None);
        let due = queues.pop_ordinary_due(115).unwrap();
        assert_eq!(due.execute_at, 115);
        assert!(queues.is_empty());
    }

    #[test]
    fn same_tick_commands_keep_arrival_order() {
        let mut queues = CommandQueues::new();
        for tag in 0..4 {
            queues.push(game(10, tag), tag == 2, 15);
        }
        let order: Vec<u8> = std::iter::from_fn(|| queues.pop_ordinary_due(25))
            .map(|d| d.command.payload[0])
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn barrier_kinds_use_their_own_queue() {
        let mut queues = CommandQueues::new();
        let action = LongAction::PlayerJoin {
            username: "Alice".into(),
        };
        queues.push(
            ScheduledCommand::new(
                CommandKind::LongActionSchedule,
                5,
                FactionId::NONE,
                UnitId::GLOBAL,
                action.to_payload(),
            ),
            false,
            15,
        );
        queues.push(game(5, 0), false, 15);

        assert!(queues.pop_barrier_due(19).is_none());
        assert!(queues.pop_ordinary_due(19).is_none());
        let due = queues.pop_barrier_due(20).unwrap();
        assert_eq!(due.command.kind, CommandKind::LongActionSchedule);
        assert_eq!(queues.len(), 1);
    }

    #[test]
    fn late_commands_are_still_due() {
        let mut queues = CommandQueues::new();
        queues.push(game(0, 0), false, 15);
        assert!(queues.pop_ordinary_due(400).is_some());
    }
}
