//! Download client abstraction.
//!
//! One adapter per supported backend, all implementing [`DownloadClient`].
//! [`DownloaderClient`] selects the adapter from a config's type tag and
//! [`DownloadDispatcher`] runs the priority-ordered fallback chain on top.

mod client;
mod dispatch;
mod nzbget;
mod payload;
mod qbittorrent;
mod rtorrent;
mod sabnzbd;
mod transmission;
mod types;
pub mod xmlrpc;

pub use client::{ClientFactory, DownloaderClient, NativeClientFactory};
pub use dispatch::{
    AggregatedDownloads, DispatchAttempt, DispatchResult, DownloadDispatcher, FreeSpace,
    TaggedDownload, ALL_DOWNLOADERS_FAILED, NO_DOWNLOADERS_CONFIGURED,
};
pub use nzbget::NzbgetClient;
pub use payload::{torrent_info_hash, PayloadResolver, TorrentPayload};
pub use qbittorrent::QBittorrentClient;
pub use rtorrent::RTorrentClient;
pub use sabnzbd::SabnzbdClient;
pub use transmission::TransmissionClient;
pub use types::*;
