use std::sync::Arc;

use async_trait::async_trait;
use dork_api::types::Action;
use dork_core::error::{Error, Result};
use dork_core::settlement::PendingSettlement;
use dork_core::storage::{ChatStoreT, CompleteMatchParams, StorageT};
use dork_core::types::{
    ChatRecord, MatchRecord, MatchStatus, MoveRecord, PlayerGameRecord, PlayerRecord,
};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

pub struct LocalDbStorage {
    conn: Arc<Mutex<Connection>>,
}

fn storage_err(e: rusqlite::Error) -> Error {
    Error::StorageError(e.to_string())
}

fn players_to_json(players: &[String]) -> String {
    serde_json::to_string(players).unwrap_or_else(|_| "[]".into())
}

fn players_from_json(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub fn init_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS matches (
           match_id TEXT PRIMARY KEY,
           game_id TEXT NOT NULL,
           status TEXT NOT NULL,
           players TEXT NOT NULL,
           winner TEXT,
           reason TEXT,
           transcript_hash TEXT,
           settlement_tx_hash TEXT,
           stake_wei TEXT NOT NULL,
           settings TEXT,
           created_at INTEGER NOT NULL,
           completed_at INTEGER,
           review_note TEXT
         );
         CREATE TABLE IF NOT EXISTS moves (
           match_id TEXT NOT NULL,
           sequence INTEGER NOT NULL,
           player TEXT NOT NULL,
           action_kind TEXT NOT NULL,
           action_data TEXT NOT NULL,
           state_hash TEXT NOT NULL,
           prev_hash TEXT NOT NULL,
           created_at INTEGER NOT NULL,
           PRIMARY KEY (match_id, sequence)
         );
         CREATE TABLE IF NOT EXISTS players (
           addr TEXT PRIMARY KEY,
           rating INTEGER NOT NULL,
           games_played INTEGER NOT NULL,
           games_won INTEGER NOT NULL,
           games_drawn INTEGER NOT NULL,
           earnings_wei TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS player_games (
           addr TEXT NOT NULL,
           game_id TEXT NOT NULL,
           rating INTEGER NOT NULL,
           games_played INTEGER NOT NULL,
           games_won INTEGER NOT NULL,
           games_drawn INTEGER NOT NULL,
           PRIMARY KEY (addr, game_id)
         );
         CREATE TABLE IF NOT EXISTS chat (
           match_id TEXT NOT NULL,
           sender TEXT NOT NULL,
           message TEXT NOT NULL,
           created_at INTEGER NOT NULL
         );",
    )
    .map_err(storage_err)?;
    Ok(())
}

impl LocalDbStorage {
    pub fn try_new_mem() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        init_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn try_new(db_file_path: &str) -> Result<Self> {
        let conn = Connection::open(db_file_path).map_err(storage_err)?;
        init_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn row_to_match_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MatchRecord> {
    let status_raw: String = row.get(2)?;
    let players_raw: String = row.get(3)?;
    Ok(MatchRecord {
        match_id: row.get(0)?,
        game_id: row.get(1)?,
        status: MatchStatus::parse(&status_raw).unwrap_or(MatchStatus::Completed),
        players: players_from_json(&players_raw),
        winner: row.get(4)?,
        reason: row.get(5)?,
        transcript_hash: row.get(6)?,
        settlement_tx_hash: row.get(7)?,
        stake_wei: row.get(8)?,
        settings: row.get(9)?,
        created_at: row.get(10)?,
        completed_at: row.get(11)?,
    })
}

const MATCH_COLUMNS: &str = "match_id, game_id, status, players, winner, reason, \
                             transcript_hash, settlement_tx_hash, stake_wei, settings, \
                             created_at, completed_at";

#[async_trait]
impl StorageT for LocalDbStorage {
    async fn save_match(&self, record: &MatchRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO matches (match_id, game_id, status, players, winner, reason,
               transcript_hash, settlement_tx_hash, stake_wei, settings, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT (match_id) DO UPDATE SET
               status = excluded.status,
               players = excluded.players,
               winner = excluded.winner,
               reason = excluded.reason,
               completed_at = excluded.completed_at",
            params![
                record.match_id,
                record.game_id,
                record.status.as_str(),
                players_to_json(&record.players),
                record.winner,
                record.reason,
                record.transcript_hash,
                record.settlement_tx_hash,
                record.stake_wei,
                record.settings,
                record.created_at,
                record.completed_at,
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_match(&self, match_id: &str) -> Result<Option<MatchRecord>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {} FROM matches WHERE match_id = ?1", MATCH_COLUMNS),
            params![match_id],
            row_to_match_record,
        )
        .optional()
        .map_err(storage_err)
    }

    async fn update_match_status(&self, match_id: &str, status: MatchStatus) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE matches SET status = ?1 WHERE match_id = ?2",
            params![status.as_str(), match_id],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn complete_match(&self, p: CompleteMatchParams) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE matches
                 SET status = 'completed', winner = ?1, reason = ?2,
                     transcript_hash = ?3, completed_at = ?4
                 WHERE match_id = ?5 AND status != 'completed'",
                params![p.winner, p.reason, p.transcript_hash, p.completed_at, p.match_id],
            )
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    async fn set_settlement_tx(&self, match_id: &str, tx_hash: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE matches SET settlement_tx_hash = ?1 WHERE match_id = ?2",
            params![tx_hash, match_id],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn flag_for_review(&self, match_id: &str, note: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE matches SET review_note = ?1 WHERE match_id = ?2",
            params![note, match_id],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn save_move(&self, record: &MoveRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO moves
               (match_id, sequence, player, action_kind, action_data,
                state_hash, prev_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.match_id,
                record.sequence,
                record.player,
                record.action.kind,
                record.action.data,
                record.state_hash,
                record.prev_hash,
                record.created_at,
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn list_moves(&self, match_id: &str) -> Result<Vec<MoveRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT match_id, sequence, player, action_kind, action_data,
                        state_hash, prev_hash, created_at
                 FROM moves WHERE match_id = ?1 ORDER BY sequence ASC",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![match_id], |row| {
                Ok(MoveRecord {
                    match_id: row.get(0)?,
                    sequence: row.get(1)?,
                    player: row.get(2)?,
                    action: Action {
                        kind: row.get(3)?,
                        data: row.get(4)?,
                    },
                    state_hash: row.get(5)?,
                    prev_hash: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    async fn list_unfinished_matches(&self) -> Result<Vec<MatchRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM matches
                 WHERE status IN ('waiting', 'active') AND review_note IS NULL
                 ORDER BY created_at ASC",
                MATCH_COLUMNS
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![], row_to_match_record)
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    async fn list_pending_settlements(&self) -> Result<Vec<PendingSettlement>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT match_id, settlement_tx_hash FROM matches
                 WHERE status = 'completed' AND settlement_tx_hash IS NOT NULL",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![], |row| {
                Ok(PendingSettlement {
                    match_id: row.get(0)?,
                    settlement_tx_hash: row.get(1)?,
                })
            })
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    async fn upsert_player(&self, addr: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO players
               (addr, rating, games_played, games_won, games_drawn, earnings_wei)
             VALUES (?1, ?2, 0, 0, 0, '0')",
            params![addr, dork_core::elo::INITIAL_RATING],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_player(&self, addr: &str) -> Result<Option<PlayerRecord>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT addr, rating, games_played, games_won, games_drawn, earnings_wei
             FROM players WHERE addr = ?1",
            params![addr],
            |row| {
                Ok(PlayerRecord {
                    addr: row.get(0)?,
                    rating: row.get(1)?,
                    games_played: row.get(2)?,
                    games_won: row.get(3)?,
                    games_drawn: row.get(4)?,
                    earnings_wei: row.get(5)?,
                })
            },
        )
        .optional()
        .map_err(storage_err)
    }

    async fn update_player(&self, record: &PlayerRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE players SET rating = ?1, games_played = ?2, games_won = ?3,
                    games_drawn = ?4, earnings_wei = ?5
             WHERE addr = ?6",
            params![
                record.rating,
                record.games_played,
                record.games_won,
                record.games_drawn,
                record.earnings_wei,
                record.addr,
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_player_game(
        &self,
        addr: &str,
        game_id: &str,
    ) -> Result<Option<PlayerGameRecord>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT addr, game_id, rating, games_played, games_won, games_drawn
             FROM player_games WHERE addr = ?1 AND game_id = ?2",
            params![addr, game_id],
            |row| {
                Ok(PlayerGameRecord {
                    addr: row.get(0)?,
                    game_id: row.get(1)?,
                    rating: row.get(2)?,
                    games_played: row.get(3)?,
                    games_won: row.get(4)?,
                    games_drawn: row.get(5)?,
                })
            },
        )
        .optional()
        .map_err(storage_err)
    }

    async fn update_player_game(&self, record: &PlayerGameRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO player_games (addr, game_id, rating, games_played, games_won, games_drawn)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (addr, game_id) DO UPDATE SET
               rating = excluded.rating,
               games_played = excluded.games_played,
               games_won = excluded.games_won,
               games_drawn = excluded.games_drawn",
            params![
                record.addr,
                record.game_id,
                record.rating,
                record.games_played,
                record.games_won,
                record.games_drawn,
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl ChatStoreT for LocalDbStorage {
    async fn save_chat(&self, record: &ChatRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO chat (match_id, sender, message, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![record.match_id, record.sender, record.message, record.created_at],
        )
        .map_err(storage_err)?;
        Ok(())
    }
}
