// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Append-only JSONL audit log with optional at-rest encryption. Grounded in
//! the teacher's "serialized through a single writer, line-atomic" design
//! note (§9) and its `SmcpAuditLogger` naming convention, but this one
//! actually persists instead of just logging via `tracing`.

use std::io::Write;
use std::path::PathBuf;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use tokio::sync::Mutex;

use crate::domain::audit::AuditRecord;

pub struct AuditSink {
    path: PathBuf,
    writer: Mutex<std::fs::File>,
    cipher: Option<Aes256Gcm>,
}

impl AuditSink {
    /// `encryption_key_b64`, if present, must decode to exactly 32 bytes and
    /// enables AES-256-GCM sealing of each line before it is written.
    pub fn open(path: PathBuf, encryption_key_b64: Option<&str>) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let writer = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let cipher = match encryption_key_b64 {
            Some(b64) => {
                let key_bytes = base64::engine::general_purpose::STANDARD.decode(b64)?;
                anyhow::ensure!(key_bytes.len() == 32, "audit encryption key must be 32 bytes");
                Some(Aes256Gcm::new_from_slice(&key_bytes)?)
            }
            None => None,
        };
        Ok(Self {
            path,
            writer: Mutex::new(writer),
            cipher,
        })
    }

    /// Write one record as a single atomic line. Never swallows a write
    /// failure — the caller logs it via `tracing` if this returns `Err`.
    pub async fn append(&self, record: &AuditRecord) -> anyhow::Result<()> {
        let json = serde_json::to_string(record)?;
        let line = match &self.cipher {
            Some(cipher) => {
                let nonce_bytes: [u8; 12] = rand::random();
                let nonce = Nonce::from_slice(&nonce_bytes);
                let ciphertext = cipher
                    .encrypt(nonce, json.as_bytes())
                    .map_err(|e| anyhow::anyhow!("audit encryption failed: {e}"))?;
                let mut combined = nonce_bytes.to_vec();
                combined.extend_from_slice(&ciphertext);
                base64::engine::general_purpose::STANDARD.encode(combined)
            }
            None => json,
        };
        let mut writer = self.writer.lock().await;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Read back and decrypt every line, for the `/admin/audit` listing and
    /// CSV export. Lines that fail to parse are skipped rather than aborting
    /// the whole read (a partially-written last line after a crash must not
    /// make the rest of the log unreadable).
    pub fn read_all(&self) -> anyhow::Result<Vec<AuditRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let mut out = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let json_line = match &self.cipher {
                Some(cipher) => {
                    let Ok(combined) = base64::engine::general_purpose::STANDARD.decode(line) else {
                        continue;
                    };
                    if combined.len() < 12 {
                        continue;
                    }
                    let (nonce_bytes, ciphertext) = combined.split_at(12);
                    let nonce = Nonce::from_slice(nonce_bytes);
                    match cipher.decrypt(nonce, ciphertext) {
                        Ok(plain) => match String::from_utf8(plain) {
                            Ok(s) => s,
                            Err(_) => continue,
                        },
                        Err(_) => continue,
                    }
                }
                None => line.to_string(),
            };
            if let Ok(record) = serde_json::from_str::<AuditRecord>(&json_line) {
                out.push(record);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = AuditSink::open(path, None).unwrap();
        sink.append(&AuditRecord::new("admin", "tool_call", serde_json::json!({"tool":"noop"})))
            .await
            .unwrap();
        let records = sink.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].actor, "admin");
    }

    #[tokio::test]
    async fn round_trips_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let key = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        let sink = AuditSink::open(path, Some(&key)).unwrap();
        sink.append(&AuditRecord::new("admin", "tool_call", serde_json::json!({"tool":"noop"})))
            .await
            .unwrap();
        let records = sink.read_all().unwrap();
        assert_eq!(records.len(), 1);

        // raw file contents must not contain the plaintext event name
        let raw = std::fs::read_to_string(sink.path()).unwrap();
        assert!(!raw.contains("tool_call"));
    }

    #[tokio::test]
    async fn appends_are_line_atomic_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = AuditSink::open(path, None).unwrap();
        for i in 0..5 {
            sink.append(&AuditRecord::new("admin", format!("event-{i}"), serde_json::json!({})))
                .await
                .unwrap();
        }
        let records = sink.read_all().unwrap();
        let events: Vec<_> = records.iter().map(|r| r.event.as_str()).collect();
        assert_eq!(events, vec!["event-0", "event-1", "event-2", "event-3", "event-4"]);
    }
}
