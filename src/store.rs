//! Session context shared by every flow of one client.
//!
//! Writers stamp their fetch when it starts; a write is applied only if its
//! stamp is newer than the last one applied to the same section, so a slow
//! read that finishes late never overwrites fresher data.

use crate::{
    estimate::PrizeEstimate,
    pool::{
        PoolSnapshot,
        UserBalances,
    },
    proxy::ProxyBinding,
};
use alloy::primitives::Address;
use std::sync::{
    RwLock,
    atomic::{
        AtomicU64,
        Ordering,
    },
};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Session {
    pub is_authenticated: bool,
    pub public_address: Option<Address>,
    pub email: Option<String>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionData {
    pub session: Session,
    pub binding: Option<ProxyBinding>,
    pub balances: Option<UserBalances>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolData {
    pub snapshot: PoolSnapshot,
    pub estimate: PrizeEstimate,
}

/// Monotonic stamp taken when a fetch starts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FetchStamp(u64);

impl FetchStamp {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StoreView {
    pub session: Option<SessionData>,
    pub pool: Option<PoolData>,
}

#[derive(Debug, Default)]
struct State {
    view: StoreView,
    session_stamp: u64,
    pool_stamp: u64,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    next_stamp: AtomicU64,
    state: RwLock<State>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_fetch(&self) -> FetchStamp {
        FetchStamp(self.next_stamp.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Replaces the session section; `false` if `stamp` is stale.
    pub fn set_session(&self, stamp: FetchStamp, data: SessionData) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if stamp.0 <= state.session_stamp {
            tracing::debug!(stamp = stamp.0, current = state.session_stamp, "discarding stale session");
            return false;
        }
        state.session_stamp = stamp.0;
        state.view.session = Some(data);
        true
    }

    /// Replaces the prize section; `false` if `stamp` is stale.
    pub fn set_pool_data(
        &self,
        stamp: FetchStamp,
        snapshot: PoolSnapshot,
        estimate: PrizeEstimate,
    ) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if stamp.0 <= state.pool_stamp {
            tracing::debug!(stamp = stamp.0, current = state.pool_stamp, "discarding stale pool data");
            return false;
        }
        state.pool_stamp = stamp.0;
        state.view.pool = Some(PoolData { snapshot, estimate });
        true
    }

    /// Clears the session section. Fetches started before the logout are discarded.
    pub fn logout(&self) {
        let stamp = self.begin_fetch();
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.session_stamp = stamp.0;
        state.view.session = None;
    }

    pub fn view(&self) -> StoreView {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .view
            .clone()
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        amount::Amount,
        estimate::{
            DrawingSchedule,
            estimate,
        },
    };
    use alloy::primitives::U256;
    use chrono::{
        TimeZone,
        Utc,
    };

    fn pool_data(block: u64) -> (PoolSnapshot, PrizeEstimate) {
        let snapshot = PoolSnapshot {
            block_number: block,
            current_draw_id: 1,
            total_balance: Amount::from_whole(10),
            accounted_balance: Amount::from_whole(10),
            eligible_supply: Amount::from_whole(5),
            open_supply: Amount::from_whole(5),
            supply_rate_per_block: U256::ZERO,
            draw_fee_fraction: U256::ZERO,
        };
        let now = Utc.timestamp_opt(0, 0).unwrap();
        let estimate = estimate(&snapshot, &DrawingSchedule::default(), now).unwrap();
        (snapshot, estimate)
    }

    fn session_data(email: &str) -> SessionData {
        SessionData {
            session: Session {
                is_authenticated: true,
                public_address: Some(Address::repeat_byte(7)),
                email: Some(email.to_string()),
            },
            binding: None,
            balances: None,
        }
    }

    #[test]
    fn set_pool_data__discards_writes_that_arrive_out_of_order() {
        // given
        let store = SessionStore::new();
        let older = store.begin_fetch();
        let newer = store.begin_fetch();
        let (fresh, fresh_estimate) = pool_data(200);
        let (stale, stale_estimate) = pool_data(100);

        // when
        let applied_newer = store.set_pool_data(newer, fresh.clone(), fresh_estimate);
        let applied_older = store.set_pool_data(older, stale, stale_estimate);

        // then
        assert!(applied_newer);
        assert!(!applied_older);
        assert_eq!(store.view().pool.unwrap().snapshot, fresh);
    }

    #[test]
    fn set_session__replaces_the_section_wholesale() {
        let store = SessionStore::new();
        let first = store.begin_fetch();
        let second = store.begin_fetch();

        store.set_session(first, session_data("a@example.com"));
        store.set_session(second, session_data("b@example.com"));

        let session = store.view().session.unwrap();
        assert_eq!(session.session.email.as_deref(), Some("b@example.com"));
    }

    #[test]
    fn logout__rejects_session_fetches_started_before_it() {
        // given
        let store = SessionStore::new();
        let in_flight = store.begin_fetch();

        // when
        store.logout();
        let applied = store.set_session(in_flight, session_data("a@example.com"));

        // then
        assert!(!applied);
        assert!(store.view().session.is_none());
    }

    #[test]
    fn sections_are_stamped_independently() {
        let store = SessionStore::new();
        let pool_stamp = store.begin_fetch();
        let session_stamp = store.begin_fetch();
        let (snapshot, estimate) = pool_data(1);

        assert!(store.set_session(session_stamp, session_data("a@example.com")));
        assert!(store.set_pool_data(pool_stamp, snapshot, estimate));
    }
}
