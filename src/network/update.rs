//! Node binary distribution
//!
//! Validates a node source folder, builds it with an external toolchain and
//! streams the artifact to every live session as `BinaryData` chunks closed
//! by a `BinaryEnd` marker.

use crate::crypto::sha256_hex;
use crate::network::registry::SessionRegistry;
use crate::network::session::{Session, SessionError};
use crate::protocol::{BinaryData, BinaryEnd, Packet, PacketId, ProtocolError};
use futures::future::join_all;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Bytes per `BinaryData` packet
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Transfer label nodes treat as a self-upgrade
pub const UPGRADE_LABEL: &str = "upgrade";

/// Update errors
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    #[error("Build failed: {0}")]
    BuildFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// How a node source folder is recognised and built
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// File that must exist in the folder
    pub marker_file: String,
    /// Required first line of the marker file
    pub module_line: String,
    pub build_program: String,
    pub build_args: Vec<String>,
    /// Artifact produced by the build, relative to the folder
    pub artifact: String,
    pub label: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            marker_file: "go.mod".to_string(),
            module_line: "module wirednode".to_string(),
            build_program: "go".to_string(),
            build_args: vec!["build".to_string()],
            artifact: "wirednode".to_string(),
            label: UPGRADE_LABEL.to_string(),
        }
    }
}

/// Outcome of one distribution run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionReport {
    pub sha256: String,
    pub size: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Builds node binaries and pushes them to connected nodes
pub struct UpdateDistributor {
    config: UpdateConfig,
    registry: Arc<SessionRegistry>,
}

impl UpdateDistributor {
    pub fn new(config: UpdateConfig, registry: Arc<SessionRegistry>) -> Self {
        Self { config, registry }
    }

    /// Check that `folder` holds a node project
    pub async fn validate(&self, folder: &Path) -> Result<(), UpdateError> {
        if !folder.is_dir() {
            return Err(UpdateError::ValidationFailed(format!(
                "{} is not a directory",
                folder.display()
            )));
        }

        let marker = folder.join(&self.config.marker_file);
        let contents = tokio::fs::read_to_string(&marker).await.map_err(|e| {
            UpdateError::ValidationFailed(format!("cannot read {}: {}", marker.display(), e))
        })?;

        let first_line = contents.lines().next().unwrap_or_default().trim();
        if first_line != self.config.module_line {
            return Err(UpdateError::ValidationFailed(format!(
                "{} does not declare `{}`",
                marker.display(),
                self.config.module_line
            )));
        }

        Ok(())
    }

    /// Run the build in `folder` and return the artifact path
    pub async fn build(&self, folder: &Path) -> Result<PathBuf, UpdateError> {
        log::info!(
            "Building node in {} with {} {}",
            folder.display(),
            self.config.build_program,
            self.config.build_args.join(" ")
        );

        let output = Command::new(&self.config.build_program)
            .args(&self.config.build_args)
            .current_dir(folder)
            .output()
            .await
            .map_err(|e| {
                UpdateError::BuildFailed(format!("cannot run {}: {}", self.config.build_program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(UpdateError::BuildFailed(format!(
                "{} exited with {}: {}",
                self.config.build_program,
                output.status,
                stderr.trim()
            )));
        }

        let artifact = folder.join(&self.config.artifact);
        if !artifact.is_file() {
            return Err(UpdateError::BuildFailed(format!(
                "artifact {} was not produced",
                artifact.display()
            )));
        }
        Ok(artifact)
    }

    /// Validate, build and send the artifact to every live session
    pub async fn distribute(&self, folder: &Path) -> Result<DistributionReport, UpdateError> {
        self.validate(folder).await?;
        let artifact = self.build(folder).await?;
        let data = tokio::fs::read(&artifact).await?;

        let packets = binary_packets(&self.config.label, &data)?;
        let sessions = self.registry.snapshot().await;
        log::info!(
            "Sending {} ({} bytes) to {} nodes",
            artifact.display(),
            data.len(),
            sessions.len()
        );

        let limit = self.registry.delivery_timeout();
        let sends = sessions
            .iter()
            .map(|session| send_all(session, &packets, limit));
        let mut report = DistributionReport {
            sha256: sha256_hex(&data),
            size: data.len(),
            delivered: 0,
            failed: 0,
        };

        for (session, result) in sessions.iter().zip(join_all(sends).await) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    log::warn!("Skipping update for {}: {}", session.addr(), e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Each chunk gets `limit` to enter the queue; a node that stops reading is dropped
async fn send_all(session: &Session, packets: &[Packet], limit: Duration) -> Result<(), SessionError> {
    for packet in packets {
        session.deliver(packet.clone(), limit).await?;
    }
    Ok(())
}

/// Split `data` into `BinaryData` packets followed by a `BinaryEnd`
pub fn binary_packets(label: &str, data: &[u8]) -> Result<Vec<Packet>, ProtocolError> {
    let mut packets = Vec::with_capacity(data.len() / CHUNK_SIZE + 2);

    for chunk in data.chunks(CHUNK_SIZE) {
        packets.push(Packet::encode(
            PacketId::BinaryData,
            &BinaryData {
                label: label.to_string(),
                data: chunk.to_vec(),
            },
        )?);
    }

    packets.push(Packet::encode(
        PacketId::BinaryEnd,
        &BinaryEnd {
            label: label.to_string(),
        },
    )?);
    Ok(packets)
}
