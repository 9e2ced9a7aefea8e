#![forbid(unsafe_code)]

use super::*;
use fl_core::model::{AgentIdentity, TransitionStatus};
use rusqlite::params;
use rusqlite::types::Value as SqlValue;
use std::collections::HashSet;

const HISTORY_LIMIT_CAP: usize = 1_000;

impl SqliteStore {
    /// Transition history, newest first, joined with intent fields.
    /// `lane=None` spans all lanes.
    pub fn history(
        &self,
        lane: Option<&str>,
        limit: usize,
        status: Option<TransitionStatus>,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut sql = String::from(
            "SELECT t.id, t.from_state, t.to_state, t.intent_id, t.lane, t.status, t.eval_json,
                    t.cost_json, t.created_at_ms, t.updated_at_ms, i.prompt, i.agent_json, i.tags
             FROM transitions t JOIN intents i ON t.intent_id = i.id WHERE 1=1",
        );
        let mut args: Vec<SqlValue> = Vec::new();
        if let Some(lane) = lane {
            sql.push_str(" AND t.lane = ?");
            args.push(SqlValue::from(lane.to_string()));
        }
        if let Some(status) = status {
            sql.push_str(" AND t.status = ?");
            args.push(SqlValue::from(status.as_str().to_string()));
        }
        sql.push_str(" ORDER BY t.created_at_ms DESC, t.id DESC LIMIT ?");
        args.push(SqlValue::from(limit.clamp(1, HISTORY_LIMIT_CAP) as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let transition = transition_from_row(row)??;
            let prompt: String = row.get(10)?;
            let agent_json: String = row.get(11)?;
            let tags: String = row.get(12)?;
            out.push(HistoryEntry {
                transition,
                prompt,
                agent: parse_required::<AgentIdentity>(&agent_json, "intent agent")?,
                tags: parse_or_default(Some(tags.as_str())),
            });
        }
        Ok(out)
    }

    /// Walk the `parent_id` chain from `state_id`, emitting the accepted
    /// transition that produced each state. Stops at genesis, at a state
    /// no accepted transition produced, or at `max_depth` hops.
    pub fn trace(&self, state_id: &str, max_depth: usize) -> Result<Vec<TraceEntry>, StoreError> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        let mut current = state_id.to_string();

        for _ in 0..max_depth {
            if !visited.insert(current.clone()) {
                return Err(StoreError::CorruptedLedger {
                    message: format!("trace cycle through state {current}"),
                });
            }
            let row = {
                let mut stmt = self.conn.prepare(
                    "SELECT t.id, t.from_state, t.to_state, t.created_at_ms,
                            i.prompt, i.agent_json, i.tags
                     FROM transitions t JOIN intents i ON t.intent_id = i.id
                     WHERE t.to_state = ?1 AND t.status = 'accepted'
                     ORDER BY t.created_at_ms DESC LIMIT 1",
                )?;
                let mut rows = stmt.query(params![current])?;
                match rows.next()? {
                    Some(row) => {
                        let agent_json: String = row.get(5)?;
                        let tags: String = row.get(6)?;
                        Some(TraceEntry {
                            transition_id: row.get(0)?,
                            from_state: row.get(1)?,
                            to_state: row.get(2)?,
                            created_at_ms: row.get(3)?,
                            prompt: row.get(4)?,
                            agent: parse_required::<AgentIdentity>(&agent_json, "intent agent")?,
                            tags: parse_or_default(Some(tags.as_str())),
                        })
                    }
                    None => None,
                }
            };

            let Some(entry) = row else { break };
            let next = entry.from_state.clone();
            out.push(entry);
            match next {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Ok(out)
    }

    /// Substring search across intent prompts, tags and agent identity,
    /// joined with the transition referencing each intent when one exists.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, StoreError> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.prompt, i.agent_json, i.tags, i.created_at_ms,
                    t.id, t.lane, t.status, t.from_state, t.to_state
             FROM intents i LEFT JOIN transitions t ON t.intent_id = i.id
             WHERE i.prompt LIKE ?1 ESCAPE '\\'
                OR i.tags LIKE ?1 ESCAPE '\\'
                OR i.agent_json LIKE ?1 ESCAPE '\\'
             ORDER BY i.created_at_ms DESC
             LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![pattern, limit.clamp(1, HISTORY_LIMIT_CAP) as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let agent_json: String = row.get(2)?;
            let tags: String = row.get(3)?;
            out.push(SearchHit {
                intent_id: row.get(0)?,
                prompt: row.get(1)?,
                agent: parse_required::<AgentIdentity>(&agent_json, "intent agent")?,
                tags: parse_or_default(Some(tags.as_str())),
                created_at_ms: row.get(4)?,
                transition_id: row.get(5)?,
                lane: row.get(6)?,
                status: row.get(7)?,
                from_state: row.get(8)?,
                to_state: row.get(9)?,
            });
        }
        Ok(out)
    }
}
