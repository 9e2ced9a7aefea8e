#![forbid(unsafe_code)]

use super::*;
use fl_core::model::{
    AgentIdentity, CostRecord, EvaluationResult, Intent, Transition, TransitionStatus,
};
use rusqlite::{OptionalExtension, Row, Transaction, TransactionBehavior, params};
use serde_json::{Map, Value};

impl SqliteStore {
    /// Record a proposed transition together with its intent. Validates
    /// that the target state is already in the store and that the lane
    /// exists; both rows land in one transaction.
    pub fn insert_transition(
        &mut self,
        from_state: Option<&str>,
        to_state: &str,
        lane: &str,
        intent: &Intent,
        cost: CostRecord,
    ) -> Result<Transition, StoreError> {
        let now = now_ms();
        let id = uuid::Uuid::new_v4().to_string();

        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !state_exists_tx(&tx, to_state)? {
            return Err(StoreError::NotFound { entity: "state", id: to_state.to_string() });
        }
        if let Some(from) = from_state
            && !state_exists_tx(&tx, from)?
        {
            return Err(StoreError::NotFound { entity: "state", id: from.to_string() });
        }
        if !lane_exists_tx(&tx, lane)? {
            return Err(StoreError::NotFound { entity: "lane", id: lane.to_string() });
        }

        tx.execute(
            "INSERT OR IGNORE INTO intents(id, prompt, agent_json, context_refs, tags, metadata, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                intent.id,
                intent.prompt,
                to_json(&intent.agent),
                to_json(&intent.context_refs),
                to_json(&intent.tags),
                to_json(&intent.metadata),
                intent.created_at,
            ],
        )?;
        tx.execute(
            "INSERT INTO transitions(id, from_state, to_state, intent_id, lane, status, cost_json, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, 'proposed', ?6, ?7, ?7)",
            params![id, from_state, to_state, intent.id, lane, to_json(&cost), now],
        )?;
        tx.commit()?;

        Ok(Transition {
            id,
            from_state: from_state.map(str::to_string),
            to_state: to_state.to_string(),
            intent_id: intent.id.clone(),
            lane: lane.to_string(),
            status: TransitionStatus::Proposed,
            evaluation: None,
            cost,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_transition(&self, id: &str) -> Result<Transition, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, from_state, to_state, intent_id, lane, status, eval_json, cost_json,
                        created_at_ms, updated_at_ms
                 FROM transitions WHERE id=?1",
                params![id],
                transition_from_row,
            )
            .optional()?;
        match row {
            Some(transition) => transition,
            None => Err(StoreError::NotFound { entity: "transition", id: id.to_string() }),
        }
    }

    /// Move a transition through its lifecycle. Edges outside the legal
    /// table are refused. Accepting additionally requires the lane head to
    /// still equal `from_state` and advances it to `to_state`; both writes
    /// commit together or not at all.
    pub fn set_transition_status(
        &mut self,
        id: &str,
        next: TransitionStatus,
        evaluation: Option<&EvaluationResult>,
    ) -> Result<Transition, StoreError> {
        let now = now_ms();
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row = tx
            .query_row(
                "SELECT from_state, to_state, lane, status FROM transitions WHERE id=?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((from_state, to_state, lane, status)) = row else {
            return Err(StoreError::NotFound { entity: "transition", id: id.to_string() });
        };
        let status = parse_status(&status)?;
        if !status.can_become(next) {
            return Err(StoreError::IllegalStatusChange {
                from: status.as_str(),
                to: next.as_str(),
            });
        }

        if next == TransitionStatus::Accepted {
            let head = tx
                .query_row(
                    "SELECT head_state FROM lanes WHERE name=?1",
                    params![lane],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?;
            let Some(head) = head else {
                return Err(StoreError::NotFound { entity: "lane", id: lane });
            };
            if head.as_deref() != from_state.as_deref() {
                return Err(StoreError::StaleProposal {
                    lane,
                    expected: from_state,
                    actual: head,
                });
            }
            tx.execute(
                "UPDATE lanes SET head_state=?2 WHERE name=?1",
                params![lane, to_state],
            )?;
        }

        match evaluation {
            Some(result) => {
                tx.execute(
                    "UPDATE transitions SET status=?2, eval_json=?3, updated_at_ms=?4 WHERE id=?1",
                    params![id, next.as_str(), to_json(result), now],
                )?;
            }
            None => {
                tx.execute(
                    "UPDATE transitions SET status=?2, updated_at_ms=?3 WHERE id=?1",
                    params![id, next.as_str(), now],
                )?;
            }
        }
        tx.commit()?;
        self.get_transition(id)
    }

    /// Add to a transition's cost record. Legal only while the transition
    /// is still proposed or evaluating.
    pub fn update_cost(&mut self, id: &str, delta: &CostRecord) -> Result<CostRecord, StoreError> {
        let now = now_ms();
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let row = tx
            .query_row(
                "SELECT status, cost_json FROM transitions WHERE id=?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        let Some((status, cost_json)) = row else {
            return Err(StoreError::NotFound { entity: "transition", id: id.to_string() });
        };
        let status = parse_status(&status)?;
        if !status.accepts_cost_updates() {
            return Err(StoreError::CostFrozen { status: status.as_str() });
        }
        let mut cost: CostRecord = parse_or_default(Some(cost_json.as_str()));
        cost.add(delta);
        tx.execute(
            "UPDATE transitions SET cost_json=?2, updated_at_ms=?3 WHERE id=?1",
            params![id, to_json(&cost), now],
        )?;
        tx.commit()?;
        Ok(cost)
    }

    /// Sum of all cost records booked against a lane, every status
    /// included. Budget enforcement runs on this.
    pub fn lane_cost_totals(&self, lane: &str) -> Result<CostRecord, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT cost_json FROM transitions WHERE lane=?1")?;
        let mut rows = stmt.query(params![lane])?;
        let mut total = CostRecord::default();
        while let Some(row) = rows.next()? {
            let cost_json: String = row.get(0)?;
            let cost: CostRecord = parse_or_default(Some(cost_json.as_str()));
            total.add(&cost);
        }
        Ok(total)
    }

    pub fn get_intent(&self, id: &str) -> Result<Intent, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT prompt, agent_json, context_refs, tags, metadata, created_at_ms
                 FROM intents WHERE id=?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((prompt, agent_json, context_refs, tags, metadata, created_at)) = row else {
            return Err(StoreError::NotFound { entity: "intent", id: id.to_string() });
        };
        Ok(Intent {
            id: id.to_string(),
            prompt,
            agent: parse_required::<AgentIdentity>(&agent_json, "intent agent")?,
            context_refs: parse_or_default(Some(context_refs.as_str())),
            tags: parse_or_default(Some(tags.as_str())),
            metadata: parse_or_default::<Map<String, Value>>(Some(&metadata)),
            created_at,
        })
    }
}

pub(super) fn parse_status(value: &str) -> Result<TransitionStatus, StoreError> {
    TransitionStatus::parse(value).ok_or_else(|| StoreError::CorruptedLedger {
        message: format!("unknown transition status {value:?}"),
    })
}

pub(super) fn transition_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Transition, StoreError>> {
    let status: String = row.get(5)?;
    let eval_json: Option<String> = row.get(6)?;
    let cost_json: String = row.get(7)?;
    Ok(build_transition(
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        status,
        eval_json,
        cost_json,
        row.get(8)?,
        row.get(9)?,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_transition(
    id: String,
    from_state: Option<String>,
    to_state: String,
    intent_id: String,
    lane: String,
    status: String,
    eval_json: Option<String>,
    cost_json: String,
    created_at: i64,
    updated_at: i64,
) -> Result<Transition, StoreError> {
    let status = parse_status(&status)?;
    let evaluation = match eval_json.as_deref() {
        Some(raw) if !raw.is_empty() => Some(parse_required::<EvaluationResult>(raw, "evaluation")?),
        _ => None,
    };
    Ok(Transition {
        id,
        from_state,
        to_state,
        intent_id,
        lane,
        status,
        evaluation,
        cost: parse_or_default(Some(cost_json.as_str())),
        created_at,
        updated_at,
    })
}

pub(super) fn state_exists_tx(tx: &Transaction<'_>, id: &str) -> Result<bool, StoreError> {
    Ok(tx
        .query_row("SELECT 1 FROM states WHERE id=?1", params![id], |_| Ok(()))
        .optional()?
        .is_some())
}
