//! Endpoint resolver for the system bus.
//!
//! An internal service may be reachable on this host, on the Colima VM, or
//! through in-cluster DNS depending on how it was deployed. The resolver
//! probes those tiers in that fixed order and reports the first healthy URL,
//! or why every tier was skipped.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`candidates`] | `EndpointClass`, per-service probe table, `build_service_health_candidates` |
//! | [`resolve`] | `resolve_endpoint` and `EndpointResolution` |
//! | [`probe`] | `ProbeClient` port and its `reqwest` implementation |
//! | [`colima`] | `discover_colima_vm_ip`, `VmIpCache`, `CommandRunner` |
//! | [`error`] | `ProbeError` |

pub mod candidates;
pub mod colima;
pub mod error;
pub mod probe;
pub mod resolve;

pub use candidates::{
    build_service_health_candidates, known_service, CandidateOptions, EndpointCandidate,
    EndpointClass, KnownService, DEFAULT_NAMESPACE, KNOWN_SERVICES,
};
pub use colima::{
    discover_colima_vm_ip, CommandOutput, CommandRunner, DiscoveryOptions, ProcessCommandRunner,
    VmIpCache, COLIMA_VM_IP_ENV, DEFAULT_COLIMA_VM_IP,
};
pub use error::ProbeError;
pub use probe::{ProbeClient, ReqwestProbeClient};
pub use resolve::{
    resolve_endpoint, EndpointResolution, ResolveOptions, SkippedCandidate, DEFAULT_PROBE_TIMEOUT,
};
