// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Turn gating invariants: newest-turn-wins, duplicate suppression, and
//! pause/resume bracketing on every path.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use vox_common::PlayerId;
use vox_strategist::agent::StrategistParameters;
use vox_strategist::player::{TurnExecutor, VoxPlayer};
use vox_strategist::StrategistError;

/// Records every call; `run_turn` blocks until the test releases a permit,
/// so tests control exactly when an execution "finishes".
struct RecordingExecutor {
    log: Arc<Mutex<Vec<String>>>,
    release: Arc<Semaphore>,
}

impl RecordingExecutor {
    fn new() -> (Arc<Self>, Arc<Mutex<Vec<String>>>, Arc<Semaphore>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let release = Arc::new(Semaphore::new(0));
        let executor = Arc::new(Self {
            log: log.clone(),
            release: release.clone(),
        });
        (executor, log, release)
    }
}

#[async_trait]
impl TurnExecutor for RecordingExecutor {
    async fn pause(&self, player: PlayerId) -> Result<(), StrategistError> {
        self.log.lock().unwrap().push(format!("pause:{player}"));
        Ok(())
    }

    async fn resume(&self, player: PlayerId) -> Result<(), StrategistError> {
        self.log.lock().unwrap().push(format!("resume:{player}"));
        Ok(())
    }

    async fn run_turn(
        &self,
        _agent: &str,
        params: &mut StrategistParameters,
        cancel: &CancellationToken,
    ) -> Result<Value, StrategistError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("run:{}:{}", params.turn, params.before));
        tokio::select! {
            _ = cancel.cancelled() => Err(StrategistError::Cancelled),
            permit = self.release.acquire() => {
                permit.unwrap().forget();
                Ok(Value::Null)
            }
        }
    }
}

async fn wait_for_log(log: &Arc<Mutex<Vec<String>>>, needle: &str) {
    wait_for_count(log, needle, 1).await;
}

async fn wait_for_count(log: &Arc<Mutex<Vec<String>>>, needle: &str, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if log.lock().unwrap().iter().filter(|entry| *entry == needle).count() >= count {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {count}x '{needle}' in {:?}",
            log.lock().unwrap()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn newest_pending_turn_wins_and_duplicates_drop() {
    let (executor, log, release) = RecordingExecutor::new();
    let player = VoxPlayer::new(0, "strategist", "g1");
    player.start(executor);

    // Turn 4 begins executing.
    player.notify_turn(4, 100);
    wait_for_log(&log, "run:4:100").await;

    // While busy: turn 5 then turn 7 arrive. Only 7 must survive.
    player.notify_turn(5, 200);
    player.notify_turn(7, 300);
    // A stale notification older than the pending one changes nothing.
    player.notify_turn(6, 250);

    release.add_permits(1);
    wait_for_log(&log, "run:7:300").await;
    release.add_permits(1);
    wait_for_log(&log, "resume:0").await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let entries = log.lock().unwrap().clone();
    let runs: Vec<&String> = entries.iter().filter(|e| e.starts_with("run:")).collect();
    assert_eq!(runs, ["run:4:100", "run:7:300"], "log: {entries:?}");

    player.abort();
}

#[tokio::test]
async fn same_turn_notification_is_dropped_while_running() {
    let (executor, log, release) = RecordingExecutor::new();
    let player = VoxPlayer::new(2, "strategist", "g1");
    player.start(executor);

    player.notify_turn(9, 500);
    wait_for_log(&log, "run:9:500").await;

    // Re-notifying the turn in flight is a no-op.
    player.notify_turn(9, 500);
    release.add_permits(1);
    wait_for_log(&log, "resume:2").await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let entries = log.lock().unwrap().clone();
    let runs = entries.iter().filter(|e| e.starts_with("run:")).count();
    assert_eq!(runs, 1, "log: {entries:?}");

    player.abort();
}

#[tokio::test]
async fn every_run_is_bracketed_by_pause_and_resume() {
    let (executor, log, release) = RecordingExecutor::new();
    let player = VoxPlayer::new(1, "strategist", "g1");
    player.start(executor);

    release.add_permits(2);
    player.notify_turn(1, 10);
    wait_for_log(&log, "resume:1").await;
    player.notify_turn(2, 20);
    wait_for_log(&log, "run:2:20").await;
    wait_for_count(&log, "resume:1", 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let entries = log.lock().unwrap().clone();
    // Strict bracketing: pause, run, resume, pause, run, resume.
    let shape: Vec<&str> = entries
        .iter()
        .map(|e| e.split(':').next().unwrap())
        .collect();
    assert_eq!(shape, ["pause", "run", "resume", "pause", "run", "resume"]);

    player.abort();
}

#[tokio::test]
async fn abort_cancels_current_execution_and_still_resumes() {
    let (executor, log, _release) = RecordingExecutor::new();
    let player = VoxPlayer::new(3, "strategist", "g1");
    player.start(executor);

    player.notify_turn(5, 50);
    wait_for_log(&log, "run:5:50").await;

    // No permit released: the run is in flight. Abort cancels it.
    player.abort();
    wait_for_log(&log, "resume:3").await;

    // The loop is dead; new notifications do nothing.
    player.notify_turn(6, 60);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let entries = log.lock().unwrap().clone();
    assert!(!entries.iter().any(|e| e == "run:6:60"), "log: {entries:?}");

    // Parameters reflect the finally path.
    let params = player.parameters().await;
    assert_eq!(params.running, None);
    assert_eq!(params.after, 50);
}
