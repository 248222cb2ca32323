// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store backends and the contract the migrator drives them through.
//!
//! - [`traits`]: the [`KeyStore`](traits::KeyStore) trait, [`KeyEntry`](traits::KeyEntry) and [`StoreError`](traits::StoreError)
//! - [`redis`]: Redis over `DUMP`/`RESTORE`
//! - [`memory`]: in-process store for tests and embedding
//! - [`pattern`]: glob matching shared by backends that filter keys themselves

pub mod traits;
pub mod pattern;
pub mod memory;
pub mod redis;
