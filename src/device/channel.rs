use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};

use crate::protocol::DriveCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendPolicy {
    /** A newer command replaces the held-back one, latest position wins. */
    Coalesce,
    /** New commands are dropped while one is held back or in flight. */
    DropWhileBusy,
}

impl Default for SendPolicy {
    fn default() -> SendPolicy {
        SendPolicy::Coalesce
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotReady,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Enqueued,
    Dropped(DropReason),
}

/**
 * Pacing and coalescing for outbound drive commands.
 *
 * The channel accepts commands only while armed (the link arms it on
 * becoming ready and a fresh channel is built per connection). At most one
 * write is in flight at a time and two writes are never issued closer
 * together than `min_interval`. The channel itself performs no IO: the
 * owner calls `next_write` after every `submit`, `write_finished` and
 * elapsed `flush_deadline`, and performs the write for any command
 * returned.
 */
#[derive(Debug)]
pub struct CommandChannel {
    min_interval: Duration,
    policy: SendPolicy,
    armed: bool,
    in_flight: bool,
    pending: Option<DriveCommand>,
    next_allowed: Option<Instant>,
}

impl CommandChannel {
    pub fn new(min_interval: Duration, policy: SendPolicy) -> CommandChannel {
        CommandChannel {
            min_interval,
            policy,
            armed: false,
            in_flight: false,
            pending: None,
            next_allowed: None,
        }
    }

    pub fn arm(&mut self) {
        self.armed = true;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
        self.in_flight = false;
        self.pending = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    fn interval_elapsed(&self, now: Instant) -> bool {
        self.next_allowed.map_or(true, |at| now >= at)
    }

    /**
     * Accepts a command for transmission. While a write is in flight or the
     * minimum interval has not elapsed, the command is coalesced or dropped
     * per the configured policy.
     */
    pub fn submit(&mut self, command: DriveCommand, now: Instant) -> SendOutcome {
        if !self.armed {
            return SendOutcome::Dropped(DropReason::NotReady);
        }

        let busy = self.in_flight || self.pending.is_some() || !self.interval_elapsed(now);
        if busy && self.policy == SendPolicy::DropWhileBusy {
            return SendOutcome::Dropped(DropReason::Busy);
        }

        // latest wins: a newer position replaces an older held-back one
        self.pending = Some(command);
        SendOutcome::Enqueued
    }

    /**
     * Takes the pending command if a write may be issued right now, and
     * marks it in flight.
     */
    pub fn next_write(&mut self, now: Instant) -> Option<DriveCommand> {
        if !self.armed || self.in_flight || !self.interval_elapsed(now) {
            return None;
        }

        let command = self.pending.take()?;
        self.in_flight = true;
        self.next_allowed = Some(now + self.min_interval);
        Some(command)
    }

    pub fn write_finished(&mut self) {
        self.in_flight = false;
    }

    /**
     * The instant at which a held-back pending command becomes due, for the
     * owner to arm a timer. `None` when no timer is needed.
     */
    pub fn flush_deadline(&self) -> Option<Instant> {
        if !self.armed || self.in_flight || self.pending.is_none() {
            return None;
        }
        self.next_allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::joystick::StickVector;

    const INTERVAL: Duration = Duration::from_millis(50);

    fn command(seq: u64) -> DriveCommand {
        DriveCommand::new(StickVector { x: 0.5, y: -0.5 }, seq)
    }

    fn armed_channel(policy: SendPolicy) -> CommandChannel {
        let mut channel = CommandChannel::new(INTERVAL, policy);
        channel.arm();
        channel
    }

    #[test]
    fn submit_while_disarmed_is_dropped() {
        let mut channel = CommandChannel::new(INTERVAL, SendPolicy::Coalesce);
        let now = Instant::now();

        assert_eq!(
            channel.submit(command(1), now),
            SendOutcome::Dropped(DropReason::NotReady)
        );
        assert_eq!(channel.next_write(now), None);
    }

    #[test]
    fn first_command_is_issued_immediately() {
        let mut channel = armed_channel(SendPolicy::Coalesce);
        let now = Instant::now();

        assert_eq!(channel.submit(command(1), now), SendOutcome::Enqueued);
        let issued = channel.next_write(now).unwrap();
        assert_eq!(issued.seq, 1);
    }

    #[test]
    fn at_most_one_write_is_in_flight() {
        let mut channel = armed_channel(SendPolicy::Coalesce);
        let now = Instant::now();

        channel.submit(command(1), now);
        assert!(channel.next_write(now).is_some());

        channel.submit(command(2), now);
        assert_eq!(channel.next_write(now + INTERVAL), None);

        channel.write_finished();
        let issued = channel.next_write(now + INTERVAL).unwrap();
        assert_eq!(issued.seq, 2);
    }

    #[test]
    fn coalescing_keeps_only_the_latest_command() {
        let mut channel = armed_channel(SendPolicy::Coalesce);
        let now = Instant::now();

        channel.submit(command(1), now);
        assert!(channel.next_write(now).is_some());

        assert_eq!(channel.submit(command(2), now), SendOutcome::Enqueued);
        assert_eq!(channel.submit(command(3), now), SendOutcome::Enqueued);

        channel.write_finished();
        let issued = channel.next_write(now + INTERVAL).unwrap();
        assert_eq!(issued.seq, 3);
        assert_eq!(channel.next_write(now + INTERVAL), None);
    }

    #[test]
    fn drop_while_busy_rejects_commands_during_a_write() {
        let mut channel = armed_channel(SendPolicy::DropWhileBusy);
        let now = Instant::now();

        channel.submit(command(1), now);
        assert!(channel.next_write(now).is_some());

        assert_eq!(
            channel.submit(command(2), now),
            SendOutcome::Dropped(DropReason::Busy)
        );
    }

    #[test]
    fn interval_holds_back_a_fast_follow_up() {
        let mut channel = armed_channel(SendPolicy::Coalesce);
        let now = Instant::now();

        channel.submit(command(1), now);
        assert!(channel.next_write(now).is_some());
        channel.write_finished();

        let shortly_after = now + Duration::from_millis(10);
        assert_eq!(channel.submit(command(2), shortly_after), SendOutcome::Enqueued);
        assert_eq!(channel.next_write(shortly_after), None);
        assert_eq!(channel.flush_deadline(), Some(now + INTERVAL));

        let issued = channel.next_write(now + INTERVAL).unwrap();
        assert_eq!(issued.seq, 2);
    }

    #[test]
    fn no_flush_deadline_without_a_held_back_command() {
        let mut channel = armed_channel(SendPolicy::Coalesce);
        let now = Instant::now();

        assert_eq!(channel.flush_deadline(), None);

        channel.submit(command(1), now);
        assert!(channel.next_write(now).is_some());
        // in flight, the completion pump takes over
        assert_eq!(channel.flush_deadline(), None);
    }

    #[test]
    fn disarm_clears_the_pending_command() {
        let mut channel = armed_channel(SendPolicy::Coalesce);
        let now = Instant::now();

        channel.submit(command(1), now);
        channel.disarm();

        assert_eq!(channel.next_write(now), None);
        assert_eq!(
            channel.submit(command(2), now),
            SendOutcome::Dropped(DropReason::NotReady)
        );
    }
}
