//! Concrete collaborators for the pipeline stages.
//!
//! Everything here is blocking: stages run on dispatcher threads, never on the
//! async runtime.

pub mod discovery;
pub mod enhancer;
pub mod html_extractor;
pub mod http;
pub mod media;
pub mod reconstruction;
pub mod structuring;

pub use discovery::{NoDiscovery, SearchApiDiscovery};
pub use enhancer::{DisabledEnhancer, HttpImageEnhancer};
pub use html_extractor::HtmlMenuExtractor;
pub use http::{HttpPageFetcher, LazyClient};
pub use media::{ArtifactMediaProbe, SignedUrlLinker, probe_iso_media};
pub use reconstruction::HttpReconstructionClient;
pub use structuring::HttpMenuExtractor;
