//! Client-side NFLOG protocol engine.
//!
//! Subscribes to Linux netfilter log groups over a `NETLINK_NETFILTER`
//! socket and turns the kernel's raw datagrams into typed packet records.
//! The crate speaks the nfnetlink_log wire protocol directly: configuration
//! commands and copy-mode settings on the way out, netlink envelopes with
//! nested type-length-value attributes on the way in.
//!
//! A session is opened with [`Nflog::new`], which runs the configuration
//! handshake against the kernel and then drains the socket from a
//! background task. Records arrive through [`Nflog::recv`] or the
//! [`Stream`](tokio_stream::Stream) impl; decode and transport errors can
//! be observed through a separate channel when enabled in [`Config`].
//!
//! ```ignore
//! use nflog::{Config, Nflog};
//!
//! let mut session = Nflog::new(Config::new().group(32).copy_range(128)).await?;
//! while let Some(packet) = session.recv().await {
//!     println!("{:?}", packet);
//! }
//! ```
//!
//! Binding a log group requires `CAP_NET_ADMIN`.

pub mod attr;
pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod packet;
pub mod session;
pub mod socket;

pub use codec::{ConfigCmd, CopyMode};
pub use config::{Config, MAX_GROUPS};
pub use error::{Error, Result};
pub use packet::{HwAddr, Packet, Timestamp};
pub use session::Nflog;
pub use socket::NetlinkSocket;
