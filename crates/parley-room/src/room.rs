//! Room state: an ordered member list and the fan-out over it.
//!
//! [`Room`] is plain data with synchronous methods. It never awaits, so
//! the actor in [`crate::actor`] can own it and apply commands one at a
//! time, and tests can drive it without a runtime.

use std::time::SystemTime;

use parley_protocol::{Envelope, RoomId, SessionId};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{RoomConfig, RoomError};

/// Outbound queue of one member's connection.
///
/// Bounded: a member that stops draining its queue gets skipped by
/// broadcasts instead of holding everyone else up.
pub type MemberSender = mpsc::Sender<Envelope>;

/// Snapshot of a room's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room_id: RoomId,
    /// Members in join order.
    pub members: Vec<SessionId>,
    pub max_members: usize,
    pub created_at: SystemTime,
}

impl RoomInfo {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members that got the frame, in fan-out order.
    pub delivered: Vec<SessionId>,
    /// Members whose queue was full or closed.
    pub skipped: Vec<SessionId>,
}

#[derive(Debug)]
struct Member {
    session_id: SessionId,
    sender: MemberSender,
}

/// One broadcast group.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    config: RoomConfig,
    /// Join order is fan-out order. Rooms are small, so a linear scan for
    /// membership checks beats keeping a second index in sync.
    members: Vec<Member>,
    created_at: SystemTime,
}

impl Room {
    pub fn new(id: RoomId, config: RoomConfig) -> Self {
        Self {
            id,
            config,
            members: Vec::new(),
            created_at: SystemTime::now(),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.members.iter().any(|m| m.session_id == session_id)
    }

    /// Member ids in join order.
    pub fn members(&self) -> Vec<SessionId> {
        self.members.iter().map(|m| m.session_id).collect()
    }

    /// Adds a member at the end of the fan-out order.
    ///
    /// # Errors
    /// - [`RoomError::AlreadyMember`] if the session is already here.
    /// - [`RoomError::RoomFull`] if the room is at `max_members`.
    pub fn add_member(
        &mut self,
        session_id: SessionId,
        sender: MemberSender,
    ) -> Result<(), RoomError> {
        if self.contains(session_id) {
            return Err(RoomError::AlreadyMember(session_id, self.id.clone()));
        }
        if self.members.len() >= self.config.max_members {
            return Err(RoomError::RoomFull(self.id.clone()));
        }
        self.members.push(Member { session_id, sender });
        Ok(())
    }

    /// Removes a member, keeping the order of the others.
    ///
    /// # Errors
    /// [`RoomError::NotMember`] if the session isn't here.
    pub fn remove_member(
        &mut self,
        session_id: SessionId,
    ) -> Result<(), RoomError> {
        let idx = self
            .members
            .iter()
            .position(|m| m.session_id == session_id)
            .ok_or_else(|| RoomError::NotMember(session_id, self.id.clone()))?;
        self.members.remove(idx);
        Ok(())
    }

    /// Queues `envelope` for every member except `exclude`, in join order.
    ///
    /// Never waits: a member whose queue is full or closed is logged and
    /// skipped, and the rest still get the frame.
    pub fn broadcast(
        &self,
        envelope: &Envelope,
        exclude: Option<SessionId>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for member in &self.members {
            if Some(member.session_id) == exclude {
                continue;
            }
            match member.sender.try_send(envelope.clone()) {
                Ok(()) => report.delivered.push(member.session_id),
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        room_id = %self.id,
                        session_id = %member.session_id,
                        "member queue saturated, skipping"
                    );
                    report.skipped.push(member.session_id);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::warn!(
                        room_id = %self.id,
                        session_id = %member.session_id,
                        "member connection gone, skipping"
                    );
                    report.skipped.push(member.session_id);
                }
            }
        }

        report
    }

    /// Best-effort `leave-ack` to every member, then forgets them all.
    /// Used when the room is torn down under its members.
    pub fn evict_all(&mut self) -> Vec<SessionId> {
        let evicted = self.members();
        for member in self.members.drain(..) {
            let notice =
                Envelope::leave_ack(Some(self.id.clone()), member.session_id);
            let _ = member.sender.try_send(notice);
        }
        evicted
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.id.clone(),
            members: self.members(),
            max_members: self.config.max_members,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::{ChatMessage, FrameKind};

    fn sid(id: u64) -> SessionId {
        SessionId(id)
    }

    fn room(max_members: usize) -> Room {
        Room::new(
            RoomId::new("lobby"),
            RoomConfig::default().with_max_members(max_members),
        )
    }

    fn frame(text: &str) -> Envelope {
        Envelope::app(
            RoomId::new("lobby"),
            None,
            ChatMessage::new(text, "alice", 1),
        )
    }

    #[test]
    fn test_add_member_keeps_insertion_order() {
        let mut r = room(8);
        let mut receivers = Vec::new();
        for id in [3, 1, 2] {
            let (tx, rx) = mpsc::channel(4);
            r.add_member(sid(id), tx).unwrap();
            receivers.push(rx);
        }
        assert_eq!(r.members(), vec![sid(3), sid(1), sid(2)]);
    }

    #[test]
    fn test_add_member_rejects_duplicate() {
        let mut r = room(8);
        r.add_member(sid(1), mpsc::channel(1).0).unwrap();
        let err = r.add_member(sid(1), mpsc::channel(1).0).unwrap_err();
        assert_eq!(err, RoomError::AlreadyMember(sid(1), RoomId::new("lobby")));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_add_member_rejects_when_full() {
        let mut r = room(2);
        r.add_member(sid(1), mpsc::channel(1).0).unwrap();
        r.add_member(sid(2), mpsc::channel(1).0).unwrap();
        let err = r.add_member(sid(3), mpsc::channel(1).0).unwrap_err();
        assert_eq!(err, RoomError::RoomFull(RoomId::new("lobby")));
    }

    #[test]
    fn test_remove_member_preserves_order_of_rest() {
        let mut r = room(8);
        for id in 1..=3 {
            r.add_member(sid(id), mpsc::channel(1).0).unwrap();
        }
        r.remove_member(sid(2)).unwrap();
        assert_eq!(r.members(), vec![sid(1), sid(3)]);
        assert!(matches!(
            r.remove_member(sid(2)),
            Err(RoomError::NotMember(..))
        ));
    }

    #[test]
    fn test_broadcast_delivers_in_join_order() {
        let mut r = room(8);
        let mut receivers = Vec::new();
        for id in [2, 1] {
            let (tx, rx) = mpsc::channel(4);
            r.add_member(sid(id), tx).unwrap();
            receivers.push(rx);
        }

        let report = r.broadcast(&frame("hi"), None);
        assert_eq!(report.delivered, vec![sid(2), sid(1)]);
        assert!(report.skipped.is_empty());
        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap(), frame("hi"));
        }
    }

    #[test]
    fn test_broadcast_skips_excluded_sender() {
        let mut r = room(8);
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        r.add_member(sid(1), tx1).unwrap();
        r.add_member(sid(2), tx2).unwrap();

        let report = r.broadcast(&frame("hi"), Some(sid(1)));
        assert_eq!(report.delivered, vec![sid(2)]);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_isolates_closed_member() {
        let mut r = room(8);
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, rx_b) = mpsc::channel(4);
        let (tx_c, mut rx_c) = mpsc::channel(4);
        r.add_member(sid(1), tx_a).unwrap();
        r.add_member(sid(2), tx_b).unwrap();
        r.add_member(sid(3), tx_c).unwrap();
        drop(rx_b);

        let report = r.broadcast(&frame("hi"), None);
        assert_eq!(report.delivered, vec![sid(1), sid(3)]);
        assert_eq!(report.skipped, vec![sid(2)]);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_isolates_saturated_member() {
        let mut r = room(8);
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, _rx_b) = mpsc::channel(1);
        tx_b.try_send(frame("backlog")).unwrap();
        r.add_member(sid(1), tx_a).unwrap();
        r.add_member(sid(2), tx_b).unwrap();

        let report = r.broadcast(&frame("hi"), None);
        assert_eq!(report.delivered, vec![sid(1)]);
        assert_eq!(report.skipped, vec![sid(2)]);
        assert_eq!(rx_a.try_recv().unwrap(), frame("hi"));
    }

    #[test]
    fn test_evict_all_notifies_and_empties() {
        let mut r = room(8);
        let (tx, mut rx) = mpsc::channel(4);
        r.add_member(sid(5), tx).unwrap();

        assert_eq!(r.evict_all(), vec![sid(5)]);
        assert!(r.is_empty());
        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.kind, FrameKind::LeaveAck);
        assert_eq!(notice.session_id, Some(sid(5)));
    }

    #[test]
    fn test_info_reports_members_and_capacity() {
        let mut r = room(3);
        r.add_member(sid(1), mpsc::channel(1).0).unwrap();
        let info = r.info();
        assert_eq!(info.room_id, RoomId::new("lobby"));
        assert_eq!(info.member_count(), 1);
        assert_eq!(info.max_members, 3);
        assert_eq!(info.created_at, r.created_at());
    }
}
