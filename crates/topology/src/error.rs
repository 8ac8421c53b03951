use thiserror::Error;

/// Result type for topology operations.
pub type Result<T> = std::result::Result<T, TopologyError>;

/// Build-time topology errors.
///
/// All variants are fatal: they are reported before any service is launched
/// and the topology never becomes active.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// The wait-for subgraph contains a cycle.
    #[error("wait-for dependency cycle: {}", path.join(" -> "))]
    Cycle {
        /// The services forming the cycle, in edge order, starting at the
        /// earliest-declared member.
        path: Vec<String>,
    },

    /// A dependency edge targets a service not present in the topology.
    #[error("service '{dependent}' depends on unknown service '{dependency}'")]
    UnknownService {
        /// The service declaring the edge.
        dependent: String,
        /// The missing target.
        dependency: String,
    },

    /// Two services in one environment block share a name.
    #[error("duplicate service name '{0}' in environment block")]
    DuplicateService(String),

    /// Two externally visible endpoints claim the same explicit port.
    #[error("port {port} claimed by both '{first}' and '{second}'")]
    PortConflict {
        /// The contested port.
        port: u16,
        /// `service/label` of the first claimant, in declaration order.
        first: String,
        /// `service/label` of the second claimant.
        second: String,
    },

    /// An environment binding or health check names an endpoint that does
    /// not exist (or was never resolved).
    #[error("unresolved endpoint reference '{service}/{endpoint}'")]
    UnresolvedReference {
        /// The service the reference points at.
        service: String,
        /// The endpoint label the reference points at.
        endpoint: String,
    },
}
