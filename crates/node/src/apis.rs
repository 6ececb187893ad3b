//! RPC service descriptors.

/// The service object behind an API namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiService {
    PublicChain,
    PublicMiner,
    PublicDownloader,
    PrivateMiner,
    PublicFilter,
    PrivateAdmin,
    PublicDebug,
    PrivateDebug,
    PublicNet,
}

/// One namespace registered with the RPC server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiDescriptor {
    pub namespace: &'static str,
    pub version: &'static str,
    pub service: ApiService,
    /// Public APIs are reachable over remote transports.
    pub public: bool,
}

impl ApiDescriptor {
    const fn new(namespace: &'static str, service: ApiService, public: bool) -> Self {
        Self {
            namespace,
            version: "1.0",
            service,
            public,
        }
    }
}

/// Every API a full node exposes, in registration order.
pub fn node_apis() -> Vec<ApiDescriptor> {
    vec![
        ApiDescriptor::new("eth", ApiService::PublicChain, true),
        ApiDescriptor::new("eth", ApiService::PublicMiner, true),
        ApiDescriptor::new("eth", ApiService::PublicDownloader, true),
        ApiDescriptor::new("miner", ApiService::PrivateMiner, false),
        ApiDescriptor::new("eth", ApiService::PublicFilter, true),
        ApiDescriptor::new("admin", ApiService::PrivateAdmin, false),
        ApiDescriptor::new("debug", ApiService::PublicDebug, true),
        ApiDescriptor::new("debug", ApiService::PrivateDebug, false),
        ApiDescriptor::new("net", ApiService::PublicNet, true),
    ]
}
