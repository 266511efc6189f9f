//! Silicon model for the wormflow accelerator tile.
//!
//! This crate has **no dependencies** and **no device access**. It is a pure
//! model of one compute tile and its attached off-chip memory bank: memory
//! tier geometry, tile/page sizes, the accumulation register file, the five
//! baby RISC-V cores and the element formats they move around.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`tiers`] | Off-chip DRAM bank and on-chip L1 geometry, alignment |
//! | [`tile`] | Tile/page sizes, circular buffer indices, register segments |
//! | [`cores`] | BRISC / NCRISC / TRISC0-2 core roles |
//! | [`format`] | Element data formats (`Float32`, `UInt32`, `Int32`) |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cores;
pub mod format;
pub mod tiers;
pub mod tile;
