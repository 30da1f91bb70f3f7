//! Extranonce space shared between this proxy and its downstream workers.
//!
//! The upstream pool grants `extranonce1` plus `extranonce2_size` bytes. Those bytes are split in
//! two: a random per-worker prefix chosen here (the proxy part) and the part the worker rolls
//! itself. The proxy part is appended to `extranonce1` and handed out as the worker's extranonce1.

use crate::errors::ShareError;
use rand::RngCore;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NonceSplit {
    /// Bytes of extranonce2 rolled by the worker
    pub worker_size: usize,
    /// Bytes of extranonce2 assigned by this proxy
    pub proxy_size: usize,
}

impl NonceSplit {
    pub fn from_extranonce2_size(size: usize) -> Self {
        let worker_size = if size > 1 { size / 2 } else { size };
        Self { worker_size, proxy_size: size - worker_size }
    }

    pub fn total(&self) -> usize {
        self.worker_size + self.proxy_size
    }
}

/// Random proxy part of `proxy_size` bytes as lowercase hex, empty when the proxy has no bytes
pub fn allocate_proxy_nonce(proxy_size: usize) -> String {
    if proxy_size == 0 {
        return String::new();
    }
    let mut bytes = vec![0u8; proxy_size];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Extranonce1 handed to a worker: upstream extranonce1 followed by its proxy part
pub fn compose_extranonce1(upstream_extranonce1: &str, proxy_nonce: &str) -> String {
    format!("{}{}", upstream_extranonce1, proxy_nonce)
}

/// Full extranonce2 for the pool: the worker's proxy part (taken from the extranonce1 it was
/// assigned, past the upstream prefix) followed by the extranonce2 the worker submitted.
pub fn full_extranonce2(
    worker_extranonce1: &str,
    upstream_extranonce1: &str,
    split: NonceSplit,
    worker_extranonce2: &str,
) -> Result<String, ShareError> {
    if !worker_extranonce1.starts_with(upstream_extranonce1) {
        return Err(ShareError::MalformedArgument(format!(
            "extranonce1 {} was assigned under a previous upstream session ({})",
            worker_extranonce1, upstream_extranonce1
        )));
    }
    let start = upstream_extranonce1.len();
    let end = start + split.proxy_size * 2;
    let proxy_part = worker_extranonce1.get(start..end).ok_or_else(|| {
        ShareError::Internal(format!(
            "worker extranonce1 {} does not carry a {} byte proxy part after {}",
            worker_extranonce1, split.proxy_size, upstream_extranonce1
        ))
    })?;
    if worker_extranonce2.len() != split.worker_size * 2 {
        return Err(ShareError::MalformedArgument(format!(
            "extranonce2 {} is not {} bytes long",
            worker_extranonce2, split.worker_size
        )));
    }
    Ok(format!("{}{}", proxy_part, worker_extranonce2))
}
