// SPDX-License-Identifier: GPL-3.0-or-later

//! Filesystem and HTTP adapters behind the application's collaborator
//! traits: the Nicotine+ web API client, playlist-file recommendation
//! source, library snapshot loader, playlist/report stores, and the
//! sidecar tagger.

pub mod documents;
pub mod library;
pub mod nicotine;
pub mod playlist_source;
pub mod reports;
pub mod state;
pub mod tagger;

pub use documents::{PlaylistDocument, TrackDocument};
pub use library::load_library_index;
pub use nicotine::NicotineClient;
pub use playlist_source::PlaylistFileSource;
pub use reports::FsReportStore;
pub use state::{load_feedback, load_pending_tags, save_pending_tags, PlaylistStore};
pub use tagger::SidecarTagger;
