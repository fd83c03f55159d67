//! Timed approve/reject polls.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::frontend::{LocationId, MessageRef, Messenger, Requester, RequesterId};
use crate::ratelimit::RateLimiter;

pub const APPROVE: &str = "\u{1F44D}";
pub const REJECT: &str = "\u{1F44E}";

/// Default length of a vote.
pub const DEFAULT_VOTE_WINDOW: Duration = Duration::from_secs(20);

/// Final result of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Approved,
    Rejected,
}

/// Ballot counts read from the poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ballot {
    pub approve: u32,
    pub reject: u32,
}

impl Ballot {
    /// Strict majority; ties (including no votes at all) reject.
    pub fn outcome(&self) -> VoteOutcome {
        if self.approve > self.reject {
            VoteOutcome::Approved
        } else {
            VoteOutcome::Rejected
        }
    }

    /// Text the poll is edited to once the vote closes.
    pub fn summary(&self) -> String {
        let verdict = match self.outcome() {
            VoteOutcome::Approved => "PASSED",
            VoteOutcome::Rejected => "FAILED",
        };
        format!("{} YES | {} NO -- VOTE {}", self.approve, self.reject, verdict)
    }
}

/// An open reset vote.
#[derive(Debug)]
pub struct VoteSession {
    pub id: Uuid,
    pub initiator: RequesterId,
    pub started_at: DateTime<Utc>,
    pub window: Duration,
    /// The rendered poll collecting reactions
    pub poll: MessageRef,
}

impl VoteSession {
    /// Post the poll, seed both ballot options and put the initiator on
    /// cooldown.
    ///
    /// The cooldown applies whatever the outcome turns out to be.
    pub async fn start(
        messenger: &dyn Messenger,
        limiter: &RateLimiter,
        initiator: &Requester,
        location: LocationId,
        window: Duration,
    ) -> Result<Self> {
        let text = format!(
            "**VOTE TO RESET** _you have {} seconds to cast your vote_",
            window.as_secs()
        );
        let poll = messenger.send(location, &text, None).await?;
        messenger.add_reaction(&poll, APPROVE).await?;
        messenger.add_reaction(&poll, REJECT).await?;
        limiter.apply(initiator).await;

        let session = Self {
            id: Uuid::new_v4(),
            initiator: initiator.id,
            started_at: Utc::now(),
            window,
            poll,
        };
        info!(
            vote = %session.id,
            initiator = %session.initiator,
            started_at = %session.started_at,
            window_secs = window.as_secs(),
            "Reset vote started"
        );
        Ok(session)
    }

    /// Wait out the window, then count ballots and publish the result.
    pub async fn await_outcome(self, messenger: &dyn Messenger) -> Result<VoteOutcome> {
        tokio::time::sleep(self.window).await;

        let (approve, reject) = futures::try_join!(
            messenger.reaction_count(&self.poll, APPROVE),
            messenger.reaction_count(&self.poll, REJECT),
        )?;
        let ballot = Ballot { approve, reject };
        debug!(vote = %self.id, approve, reject, "Ballots counted");

        messenger.edit(&self.poll, &ballot.summary()).await?;

        let outcome = ballot.outcome();
        info!(vote = %self.id, outcome = ?outcome, "Reset vote closed");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::AuthLevel;
    use crate::testing::{FakeMessenger, FakePermissions};
    use std::collections::HashSet;
    use std::sync::Arc;

    const CHANNEL: LocationId = LocationId(100);

    fn voter() -> Requester {
        Requester {
            id: RequesterId(9),
            level: AuthLevel(1),
            location: CHANNEL,
        }
    }

    #[test]
    fn test_ballot_outcomes() {
        let ballot = |approve, reject| Ballot { approve, reject };
        assert_eq!(ballot(3, 1).outcome(), VoteOutcome::Approved);
        assert_eq!(ballot(2, 2).outcome(), VoteOutcome::Rejected);
        assert_eq!(ballot(0, 0).outcome(), VoteOutcome::Rejected);
        assert_eq!(ballot(1, 4).outcome(), VoteOutcome::Rejected);
    }

    #[test]
    fn test_ballot_summary() {
        assert_eq!(
            Ballot { approve: 3, reject: 1 }.summary(),
            "3 YES | 1 NO -- VOTE PASSED"
        );
        assert_eq!(
            Ballot { approve: 2, reject: 2 }.summary(),
            "2 YES | 2 NO -- VOTE FAILED"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_vote_reads_ballots_after_window() {
        let messenger = FakeMessenger::default();
        let limiter = RateLimiter::new(
            Arc::new(FakePermissions::default()),
            HashSet::from([CHANNEL]),
        );

        let session = VoteSession::start(&messenger, &limiter, &voter(), CHANNEL, DEFAULT_VOTE_WINDOW)
            .await
            .unwrap();
        assert_eq!(messenger.reactions(&session.poll), vec![APPROVE, REJECT]);
        assert!(limiter.is_restricted(&RequesterId(9)));

        // Ballots keep arriving during the window.
        let poll = session.poll;
        let ballots = messenger.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            ballots.set_reaction_count(&poll, APPROVE, 3);
            tokio::time::sleep(Duration::from_secs(10)).await;
            ballots.set_reaction_count(&poll, REJECT, 1);
        });

        let started = tokio::time::Instant::now();
        let outcome = session.await_outcome(&messenger).await.unwrap();
        assert!(started.elapsed() >= DEFAULT_VOTE_WINDOW);
        assert_eq!(outcome, VoteOutcome::Approved);
        assert_eq!(
            messenger.content(&poll).as_deref(),
            Some("3 YES | 1 NO -- VOTE PASSED")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_vote_rejects() {
        let messenger = FakeMessenger::default();
        let limiter = RateLimiter::new(Arc::new(FakePermissions::default()), HashSet::new());

        let session = VoteSession::start(&messenger, &limiter, &voter(), CHANNEL, DEFAULT_VOTE_WINDOW)
            .await
            .unwrap();
        let poll = session.poll;
        let outcome = session.await_outcome(&messenger).await.unwrap();

        assert_eq!(outcome, VoteOutcome::Rejected);
        assert_eq!(
            messenger.content(&poll).as_deref(),
            Some("0 YES | 0 NO -- VOTE FAILED")
        );
    }
}
