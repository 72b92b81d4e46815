use core::{fmt, str::FromStr};
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, UdpSocket};

use crate::{error::ConfigurationError, layout::BitLayout};

/// The worker field of every ID issued by one allocator.
///
/// Only obtainable through [`WorkerSource::resolve`] or
/// [`WorkerId::new`], both of which check it against the layout's worker
/// width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Checks that `id` fits in `layout`'s worker bits.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::WorkerIdOverflow`] if it does not.
    pub fn new(id: u64, layout: &BitLayout) -> Result<Self, ConfigurationError> {
        if BitLayout::fits(id, layout.worker_bits()) {
            Ok(Self(id))
        } else {
            Err(ConfigurationError::WorkerIdOverflow {
                worker_id: id,
                worker_bits: layout.worker_bits(),
            })
        }
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An inclusive range of IPv4 addresses whose hosts share one ID space.
///
/// Each host's worker id is its address's offset from `start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AddressRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl AddressRange {
    pub const fn new(start: Ipv4Addr, end: Ipv4Addr) -> Self {
        Self { start, end }
    }

    /// Number of addresses in the range, or `None` if it is reversed.
    pub fn len(&self) -> Option<u64> {
        let (start, end) = (u32::from(self.start), u32::from(self.end));
        (end >= start).then(|| u64::from(end - start) + 1)
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool {
        (self.start..=self.end).contains(&address)
    }

    /// Validates the range against `layout` and returns the worker id of
    /// `address` within it.
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError::ReversedRange`] if `end < start`
    /// - [`ConfigurationError::RangeTooLarge`] if the range holds more than
    ///   `2^worker_bits` addresses
    /// - [`ConfigurationError::AddressOutOfRange`] if `address` lies outside
    pub fn offset_of(
        &self,
        address: Ipv4Addr,
        layout: &BitLayout,
    ) -> Result<WorkerId, ConfigurationError> {
        let size = self.len().ok_or(ConfigurationError::ReversedRange {
            start: self.start,
            end: self.end,
        })?;
        if u128::from(size) > layout.worker_capacity() {
            return Err(ConfigurationError::RangeTooLarge {
                size,
                worker_bits: layout.worker_bits(),
            });
        }
        if !self.contains(address) {
            return Err(ConfigurationError::AddressOutOfRange {
                address,
                start: self.start,
                end: self.end,
            });
        }
        WorkerId::new(u64::from(u32::from(address) - u32::from(self.start)), layout)
    }
}

impl FromStr for AddressRange {
    type Err = ConfigurationError;

    /// Parses `"<start>-<end>"`, e.g. `192.168.0.1-192.168.0.100`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigurationError::MalformedRange(s.to_owned());
        let (start, end) = s.split_once('-').ok_or_else(malformed)?;
        let start = start.trim().parse().map_err(|_| malformed())?;
        let end = end.trim().parse().map_err(|_| malformed())?;
        Ok(Self { start, end })
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// How an instance obtains its worker id. The two modes are exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum WorkerSource {
    /// A configured application id. Must be at least 1.
    AppId(u64),
    /// The local host's offset within an address range.
    Range(AddressRange),
}

impl WorkerSource {
    /// Resolves the worker id for this host.
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError::ZeroAppId`] for an explicit id of 0
    /// - [`ConfigurationError::WorkerIdOverflow`] if the id does not fit
    /// - [`ConfigurationError::UnresolvedLocalAddress`] if `local` has no
    ///   address to offer
    /// - any range error from [`AddressRange::offset_of`]
    pub fn resolve(
        &self,
        layout: &BitLayout,
        local: &impl LocalAddress,
    ) -> Result<WorkerId, ConfigurationError> {
        match *self {
            Self::AppId(0) => Err(ConfigurationError::ZeroAppId),
            Self::AppId(id) => WorkerId::new(id, layout),
            Self::Range(range) => {
                // Reject a malformed range before touching the network.
                if range.len().is_none() {
                    return Err(ConfigurationError::ReversedRange {
                        start: range.start,
                        end: range.end,
                    });
                }
                let address = local
                    .local_ipv4()
                    .ok_or(ConfigurationError::UnresolvedLocalAddress)?;
                range.offset_of(address, layout)
            }
        }
    }
}

/// A way to learn this host's own IPv4 address.
pub trait LocalAddress {
    fn local_ipv4(&self) -> Option<Ipv4Addr>;
}

/// A fixed address, for overrides and tests.
impl LocalAddress for Ipv4Addr {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        Some(*self)
    }
}

impl<T: LocalAddress + ?Sized> LocalAddress for &T {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        (**self).local_ipv4()
    }
}

/// Asks the OS which local IPv4 address it would use to reach `probe`.
///
/// Connecting a UDP socket only selects a route; no packet is sent, so the
/// probe address does not need to be reachable, just routable.
#[derive(Clone, Copy, Debug)]
pub struct HostAddress {
    probe: SocketAddrV4,
}

impl HostAddress {
    pub const fn with_probe(probe: SocketAddrV4) -> Self {
        Self { probe }
    }
}

impl Default for HostAddress {
    /// Probes TEST-NET-1, which follows the default route.
    fn default() -> Self {
        Self::with_probe(SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 1), 9))
    }
}

impl LocalAddress for HostAddress {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        socket.connect(self.probe).ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(address) if !address.is_unspecified() => Some(address),
            _ => None,
        }
    }
}
