//! Rate-limit-aware request routing for the Cordial client.
//!
//! [`RequestRouter`] serializes requests per rate-limit bucket and gates
//! every bucket through one global limiter. Callers submit a [`Route`] and a
//! [`Payload`] and await the returned [`RequestHandle`].
//!
//! - 429 responses are retried after the server's delay without counting
//!   against the retry budget
//! - 5xx responses and transport failures are retried with backoff
//! - other 4xx responses fail immediately
//!
//! [`Route`]: cordial_rate_limit::Route

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod queue;
mod router;
pub mod routes;
mod transport;

pub use queue::{QueuedRequest, RequestQueue};
pub use router::{RequestHandle, RequestRouter};
pub use routes::{Endpoint, GatewayBot, SessionStartLimit};
pub use transport::{HttpResponse, HttpTransport, Payload, ReqwestTransport};
