// SPDX-License-Identifier: GPL-3.0-or-later

//! Core pipeline logic: normalization, reconciliation, acquisition, and
//! playlist lifecycle, wired together behind collaborator traits.

pub mod acquire;
pub mod collab;
pub mod normalize;
pub mod pipeline;
pub mod playlist;
pub mod reconcile;
