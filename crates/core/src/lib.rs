pub mod config;
pub mod downloader;
pub mod metrics;
pub mod searcher;
pub mod service;
pub mod store;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
    TimeoutConfig,
};
pub use downloader::{
    AddDownloadRequest, ClientFactory, DispatchResult, DownloadClient, DownloadDispatcher,
    DownloaderClient, DownloaderConfig, DownloaderError, DownloaderType, NativeClientFactory,
};
pub use searcher::{
    AggregatedSearchResults, DownloadType, Indexer, IndexerProtocol, ProtocolSearcher,
    SearchAggregator, SearchError, SearchItem, SearchParams,
};
pub use service::{AcquisitionService, GameDownloadLink, ServiceError, TestTarget};
pub use store::{ConfigStore, InMemoryConfigStore, StoreError};
