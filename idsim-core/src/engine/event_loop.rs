//! Discrete-event loop: replay ledger orders and run settlements, solves,
//! decisions and agent submissions in timestamp order.
//!
//! Events at one timestamp run in phase order:
//!
//! 1. Settlement of the delivery hour starting now
//! 2. Ledger orders
//! 3. Agent orders becoming visible to the book
//! 4. Decisions becoming available
//! 5. Solve starts

use std::time::Instant;

use tracing::{debug, trace};

use super::dp::HourSlot;
use super::order_book::{BookEvent, Owner};
use super::pricing::{HourPricing, Ladder, PriceSource};
use super::settlement::{Execution, HourQuotes};
use super::state::{Decision, EngineState, Pending, PendingOrder, Phase};
use super::translator::{HoldReason, Translation};
use crate::data::{ForecastTable, OrderLedger};
use crate::domain::units::{hour_floor, MS_PER_HOUR};
use crate::domain::{LimitOrder, Side, Timestamp};
use crate::engine::simulation::SimError;

impl EngineState {
    /// Process events up to the ledger's last queued order. With `drain`,
    /// keep going through internal events until the end of the run.
    pub fn run_events(
        &mut self,
        ledger: &mut OrderLedger,
        forecast: &ForecastTable,
        drain: bool,
    ) -> Result<(), SimError> {
        loop {
            let internal = self.next_internal();
            let next_order = ledger.peek().map(|o| (o.start, Phase::Ledger));
            match (internal, next_order) {
                (internal, Some(order)) if internal.map_or(true, |i| order < i) => {
                    if let Some(order) = ledger.pop() {
                        self.on_ledger_order(order)?;
                    }
                }
                (Some(_), Some(_)) => self.dispatch_internal(forecast)?,
                (Some(_), None) if drain => self.dispatch_internal(forecast)?,
                _ => break,
            }
        }
        Ok(())
    }

    fn dispatch_internal(&mut self, forecast: &ForecastTable) -> Result<(), SimError> {
        let Some((time, phase)) = self.next_internal() else {
            return Ok(());
        };
        if phase == Phase::Settlement {
            return self.on_settlement(time, forecast);
        }
        let Some(scheduled) = self.pop_queued() else {
            return Ok(());
        };
        match scheduled.event {
            Pending::Solve => self.on_solve(scheduled.time, forecast),
            Pending::Decide(decision) => self.on_decision(scheduled.time, *decision),
            Pending::Visible(pending) => self.on_visible(scheduled.time, pending),
        }
    }

    // ── Market events ──────────────────────────────────────────────────

    fn on_ledger_order(&mut self, order: LimitOrder) -> Result<(), SimError> {
        let time = order.start;
        if time >= self.config.end || order.delivery <= order.start {
            trace!(id = %order.id, "ledger order outside the tradable window");
            return Ok(());
        }
        let events = self.book.submit(order, Owner::Market)?;
        self.apply_book_events(events);
        self.counters.orders_replayed += 1;
        self.poke_event_cadence(time);
        Ok(())
    }

    fn on_settlement(&mut self, hour: Timestamp, forecast: &ForecastTable) -> Result<(), SimError> {
        self.advance(hour)?;
        let quotes = HourQuotes {
            bid: self.book.best_price(hour, Side::Buy),
            ask: self.book.best_price(hour, Side::Sell),
        };
        for removal in self.book.close_delivery(hour) {
            self.settlement.record_removal(&removal);
        }
        self.agent_orders.remove(&hour);
        let reference = forecast
            .price_for(hour, hour)
            .or_else(|| forecast.price_for_latest(hour));
        self.settlement
            .settle_hour(hour, hour, self.runs, reference, quotes);

        let next = hour + MS_PER_HOUR;
        self.next_settlement = (next < self.config.end).then_some(next);
        self.poke_event_cadence(hour);
        Ok(())
    }

    /// Book trades and removals produced by market activity. Passive fills
    /// of a resting agent order fold into its run's executed entry.
    fn apply_book_events(&mut self, events: Vec<BookEvent>) {
        for event in events {
            match event {
                BookEvent::Trade(trade) => {
                    self.settlement.record_print(&trade);
                    let Some((agent, counterparty)) = trade.agent_fill() else {
                        continue;
                    };
                    let Owner::Agent { dp_run, solve_time } = agent.owner else {
                        continue;
                    };
                    self.settlement
                        .record_accepted(dp_run, trade.time, &counterparty.order, trade.volume);
                    if let Some(exec) = Execution::from_trade(&trade, dp_run, solve_time) {
                        self.settlement.record_execution(&exec);
                    }
                }
                BookEvent::Removed(removal) => self.settlement.record_removal(&removal),
            }
        }
    }

    fn advance(&mut self, time: Timestamp) -> Result<(), SimError> {
        let events = self.book.advance_to(time)?;
        self.apply_book_events(events);
        Ok(())
    }

    // ── Optimizer events ───────────────────────────────────────────────

    fn on_solve(&mut self, now: Timestamp, forecast: &ForecastTable) -> Result<(), SimError> {
        self.advance(now)?;
        let slots = self.build_slots(now, forecast);
        if slots.is_empty() {
            debug!(now, "nothing to optimize, solve skipped");
            self.counters.skipped_solves += 1;
            self.schedule_next_solve(now, now);
            return Ok(());
        }

        let timer = Instant::now();
        let plan = self.solver.solve(self.settlement.storage(), &slots);
        let elapsed = timer.elapsed();
        self.counters.solve_time += elapsed;
        self.runs += 1;
        if !plan.feasible {
            self.counters.infeasible_plans += 1;
        }
        debug!(
            dp_run = self.runs,
            now,
            hours = slots.len(),
            storage = self.settlement.storage(),
            value = ?plan.expected_value,
            "solve"
        );

        let available = now + self.config.solve_duration.resolve(elapsed);
        let decision = Decision {
            dp_run: self.runs,
            solve_time: now,
            plan,
        };
        self.schedule(available, Phase::Decision, Pending::Decide(Box::new(decision)));
        Ok(())
    }

    /// Hours after `now` inside the horizon, each with its pricing.
    /// Trailing hours with nothing to price are dropped.
    pub(crate) fn build_slots(&self, now: Timestamp, forecast: &ForecastTable) -> Vec<HourSlot> {
        let horizon_end = self.config.horizon_end(now);
        let mut slots = Vec::new();
        let mut delivery = hour_floor(now) + MS_PER_HOUR;
        while delivery < self.config.end && delivery <= horizon_end {
            let liquid = self.book.has_liquidity(delivery);
            let pricing = if liquid && delivery - now <= self.config.horizon_end_ms {
                self.book_pricing(delivery)
            } else if let Some(price) = forecast.price_for(delivery, now) {
                HourPricing::Forecast(price)
            } else if liquid {
                self.book_pricing(delivery)
            } else {
                HourPricing::Frozen
            };
            let position = self.settlement.position(delivery);
            slots.push(HourSlot {
                delivery,
                pricing,
                executed: position.executed,
                committed: position.committed,
            });
            delivery += MS_PER_HOUR;
        }
        while slots.last().is_some_and(|s| s.pricing.is_frozen()) {
            slots.pop();
        }
        slots
    }

    fn book_pricing(&self, delivery: Timestamp) -> HourPricing {
        HourPricing::Book {
            asks: Ladder::new(self.book.ladder(delivery, Side::Sell)),
            bids: Ladder::new(self.book.ladder(delivery, Side::Buy)),
        }
    }

    fn on_decision(&mut self, now: Timestamp, decision: Decision) -> Result<(), SimError> {
        self.advance(now)?;
        let Decision {
            dp_run,
            solve_time,
            plan,
        } = decision;
        let actionable = self
            .translator
            .actionable_hour(&plan, now)
            .map(|h| h.delivery);

        let mut visible_at = now;
        for hour in &plan.hours {
            // Settled while the solve ran.
            if hour.delivery <= now {
                continue;
            }
            // Carried as a fixed flow; nothing prices a resting order.
            if hour.source == PriceSource::Frozen {
                self.cancel_agent_order(hour.delivery);
                continue;
            }
            if Some(hour.delivery) != actionable {
                self.settlement.record_forecast(
                    dp_run,
                    now,
                    solve_time,
                    hour.delivery,
                    hour.target,
                    hour.net_reward,
                );
                continue;
            }
            match self.translator.translate(hour, &self.book) {
                Translation::Submit(intent) => {
                    visible_at = now + self.config.ping_delay;
                    self.settlement.commit(hour.delivery, hour.target);
                    let pending = PendingOrder {
                        dp_run,
                        solve_time,
                        intent,
                        reward: hour.net_reward,
                    };
                    self.schedule(visible_at, Phase::Visibility, Pending::Visible(pending));
                }
                Translation::Hold(reason) => {
                    debug!(dp_run, delivery = hour.delivery, ?reason, "no order");
                    // The resting order reflects an outdated decision.
                    self.cancel_agent_order(hour.delivery);
                    // An unprofitable action is not delivered: hold what is executed.
                    let (volume, reward) = match reason {
                        HoldReason::NotProfitable => {
                            (self.settlement.position(hour.delivery).executed, 0)
                        }
                        _ => (hour.target, hour.net_reward),
                    };
                    self.settlement.record_forecast(
                        dp_run,
                        now,
                        solve_time,
                        hour.delivery,
                        volume,
                        reward,
                    );
                }
            }
        }
        self.schedule_next_solve(solve_time, visible_at);
        Ok(())
    }

    fn on_visible(&mut self, now: Timestamp, pending: PendingOrder) -> Result<(), SimError> {
        self.advance(now)?;
        let PendingOrder {
            dp_run,
            solve_time,
            intent,
            reward,
        } = pending;
        let delivery = intent.delivery;
        if now >= delivery {
            debug!(dp_run, delivery, "order became visible after the gate");
            return Ok(());
        }

        self.cancel_agent_order(delivery);
        let executed = self.settlement.position(delivery).executed;
        let volume = self.translator.config().clip(intent.target - executed);
        if Side::of_signed(volume) != Some(intent.side) {
            self.settlement
                .record_forecast(dp_run, now, solve_time, delivery, intent.target, reward);
            return Ok(());
        }

        let id = self.book.issue_id();
        let order = LimitOrder {
            id,
            initial_id: id,
            start: now,
            cancel: delivery,
            delivery,
            side: intent.side,
            price: intent.price,
            volume: volume.abs(),
        };
        self.counters.agent_orders += 1;
        let events = self
            .book
            .submit(order, Owner::Agent { dp_run, solve_time })?;

        let mut fill: Option<Execution> = None;
        for event in events {
            match event {
                BookEvent::Trade(trade) => {
                    self.settlement.record_print(&trade);
                    if let Some((_, counterparty)) = trade.agent_fill() {
                        self.settlement.record_accepted(
                            dp_run,
                            trade.time,
                            &counterparty.order,
                            trade.volume,
                        );
                    }
                    if let Some(exec) = Execution::from_trade(&trade, dp_run, solve_time) {
                        match fill.as_mut() {
                            Some(total) => total.absorb(&exec),
                            None => fill = Some(exec),
                        }
                    }
                }
                BookEvent::Removed(removal) => self.settlement.record_removal(&removal),
            }
        }

        match fill {
            Some(exec) => self.settlement.record_execution(&exec),
            None => self
                .settlement
                .record_forecast(dp_run, now, solve_time, delivery, intent.target, reward),
        }
        if self.book.family_member(id).is_some() {
            self.agent_orders.insert(delivery, id);
        }
        Ok(())
    }

    fn cancel_agent_order(&mut self, delivery: Timestamp) {
        if let Some(previous) = self.agent_orders.remove(&delivery) {
            if let Some(removal) = self.book.cancel_family(previous) {
                trace!(delivery, id = %removal.order.id, "agent order withdrawn");
            }
        }
    }

    // ── Cadence ────────────────────────────────────────────────────────

    fn schedule_next_solve(&mut self, last_start: Timestamp, visible_at: Timestamp) {
        match self.cadence.next_solve(last_start, visible_at) {
            Some(next) if next < self.config.end => {
                self.schedule(next, Phase::Solve, Pending::Solve)
            }
            Some(_) => {}
            None => self.awaiting_event = Some(visible_at),
        }
    }

    /// Event-driven cadence: a market event or settlement after the last
    /// decision became visible starts a new solve.
    fn poke_event_cadence(&mut self, time: Timestamp) {
        if !self.cadence.triggered_by_events() {
            return;
        }
        if self.awaiting_event.is_some_and(|since| time >= since) && time < self.config.end {
            self.awaiting_event = None;
            self.schedule(time, Phase::Solve, Pending::Solve);
        }
    }
}
