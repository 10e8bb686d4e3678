use crate::{
    PoolError,
    Result,
    amount::{
        Amount,
        ONE,
    },
    pool::PoolSnapshot,
};
use alloy::primitives::U256;
use chrono::{
    DateTime,
    Duration,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};

/// Block time the remaining-blocks estimate assumes.
pub const AVERAGE_BLOCK_SECS: u64 = 15;
/// Bounds reported alongside the estimate; real block times drift within these.
pub const FAST_BLOCK_SECS: u64 = 13;
pub const SLOW_BLOCK_SECS: u64 = 17;

// Friday 2020-05-01 19:00:00 UTC
const FIRST_DRAWING_TIMESTAMP: i64 = 1_588_359_600;
const DEFAULT_DRAWINGS: usize = 520;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Daily,
    Weekly,
}

impl Cadence {
    pub fn period(self) -> Duration {
        match self {
            Cadence::Daily => Duration::days(1),
            Cadence::Weekly => Duration::weeks(1),
        }
    }
}

/// Ascending table of drawing dates.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DrawingSchedule {
    dates: Vec<DateTime<Utc>>,
}

impl DrawingSchedule {
    pub fn new(mut dates: Vec<DateTime<Utc>>) -> Self {
        dates.sort_unstable();
        dates.dedup();
        Self { dates }
    }

    pub fn recurring(first: DateTime<Utc>, cadence: Cadence, count: usize) -> Self {
        let period = cadence.period();
        let dates = (0..count)
            .map_while(|i| {
                let offset = period.checked_mul(i32::try_from(i).ok()?)?;
                first.checked_add_signed(offset)
            })
            .collect();
        Self::new(dates)
    }

    /// Weekly Friday 19:00 UTC drawings from May 2020, ten years deep.
    pub fn default_weekly() -> Self {
        match DateTime::from_timestamp(FIRST_DRAWING_TIMESTAMP, 0) {
            Some(first) => Self::recurring(first, Cadence::Weekly, DEFAULT_DRAWINGS),
            None => Self::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn last(&self) -> Option<DateTime<Utc>> {
        self.dates.last().copied()
    }

    /// First drawing strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let idx = self.dates.partition_point(|date| *date <= now);
        self.dates
            .get(idx)
            .copied()
            .ok_or(PoolError::ScheduleExhausted { last: self.last() })
    }
}

impl Default for DrawingSchedule {
    fn default() -> Self {
        Self::default_weekly()
    }
}

/// Estimated number of blocks left until a drawing.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct BlockEstimate {
    pub blocks: u64,
    /// Blocks left if the chain runs at [`SLOW_BLOCK_SECS`].
    pub min_blocks: u64,
    /// Blocks left if the chain runs at [`FAST_BLOCK_SECS`].
    pub max_blocks: u64,
    pub assumed_block_secs: u64,
}

impl BlockEstimate {
    pub fn until(remaining: Duration) -> Self {
        let secs = u64::try_from(remaining.num_seconds()).unwrap_or(0);
        Self {
            blocks: secs / AVERAGE_BLOCK_SECS,
            min_blocks: secs / SLOW_BLOCK_SECS,
            max_blocks: secs / FAST_BLOCK_SECS,
            assumed_block_secs: AVERAGE_BLOCK_SECS,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PrizeEstimate {
    pub total_earning_interest: Amount,
    pub eligible_tickets: Amount,
    pub open_tickets: Amount,
    pub sponsored_amount: Amount,
    /// Set when on-chain supplies exceed the accounted balance.
    pub sponsorship_deficit: Option<Amount>,
    pub accrued_prize: Amount,
    pub estimated_prize: Amount,
    pub next_drawing: DateTime<Utc>,
    pub remaining_blocks: BlockEstimate,
}

/// `accounted - eligible - open`, saturating at zero, with the deficit when negative.
pub fn sponsorship(
    accounted: Amount,
    eligible: Amount,
    open: Amount,
) -> (Amount, Option<Amount>) {
    let tickets = eligible.raw().saturating_add(open.raw());
    match accounted.raw().checked_sub(tickets) {
        Some(sponsored) => (Amount::from_raw(sponsored), None),
        None => (Amount::ZERO, Some(Amount::from_raw(tickets - accounted.raw()))),
    }
}

/// Interest earned since the last accounted balance, net of the draw fee.
pub fn accrued_prize(balance: U256, accounted: U256, fee_fraction: U256) -> U256 {
    let gross = balance.saturating_sub(accounted);
    let fee = gross.saturating_mul(fee_fraction) / ONE;
    gross.saturating_sub(fee)
}

/// Share of the per-block supply rate that goes to the prize.
pub fn prize_supply_rate(supply_rate_per_block: U256, fee_fraction: U256) -> U256 {
    supply_rate_per_block.saturating_mul(ONE.saturating_sub(fee_fraction)) / ONE
}

pub fn prize_estimate(
    balance: U256,
    accrued: U256,
    blocks_fixed_point: U256,
    prize_rate: U256,
) -> U256 {
    let interest_rate = blocks_fixed_point.saturating_mul(prize_rate) / ONE;
    let interest = interest_rate.saturating_mul(balance) / ONE;
    interest.saturating_add(accrued)
}

pub fn estimate(
    snapshot: &PoolSnapshot,
    schedule: &DrawingSchedule,
    now: DateTime<Utc>,
) -> Result<PrizeEstimate> {
    let next_drawing = schedule.next_after(now)?;
    let remaining_blocks = BlockEstimate::until(next_drawing - now);

    let (sponsored_amount, sponsorship_deficit) = sponsorship(
        snapshot.accounted_balance,
        snapshot.eligible_supply,
        snapshot.open_supply,
    );
    if let Some(deficit) = sponsorship_deficit {
        tracing::warn!(
            block = snapshot.block_number,
            %deficit,
            "ticket supply exceeds accounted balance"
        );
    }

    let balance = snapshot.total_balance.raw();
    let accrued = accrued_prize(
        balance,
        snapshot.accounted_balance.raw(),
        snapshot.draw_fee_fraction,
    );
    let rate = prize_supply_rate(snapshot.supply_rate_per_block, snapshot.draw_fee_fraction);
    let blocks_fixed_point = U256::from(remaining_blocks.blocks).saturating_mul(ONE);
    let estimated = prize_estimate(balance, accrued, blocks_fixed_point, rate);

    Ok(PrizeEstimate {
        total_earning_interest: snapshot.accounted_balance,
        eligible_tickets: snapshot.eligible_supply,
        open_tickets: snapshot.open_supply,
        sponsored_amount,
        sponsorship_deficit,
        accrued_prize: Amount::from_raw(accrued),
        estimated_prize: Amount::from_raw(estimated),
        next_drawing,
        remaining_blocks,
    })
}
