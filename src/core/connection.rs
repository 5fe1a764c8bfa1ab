//! Connection-set algebra
//!
//! A [`ConnectionSet`] is an immutable set of elementary connections: a
//! protocol plus a destination port (TCP/UDP) or an ICMP `(type, code)` pair.
//! Every operation returns a new value, so sets can be shared freely between
//! evaluation threads.
//!
//! Each protocol dimension is stored as an [`IntervalSet`] in canonical form
//! (sorted, disjoint, non-adjacent intervals), which makes structural equality
//! coincide with set equality.
//!
//! # Example
//!
//! ```
//! use dfw_analyzer::core::connection::{ConnectionSet, PortRange};
//!
//! let smb = ConnectionSet::tcp(PortRange::single(445));
//! let web: ConnectionSet = "tcp/80-443".parse().unwrap();
//!
//! let both = smb.union(&web);
//! assert!(smb.is_subset(&both));
//! assert_eq!(both.to_string(), "TCP 80-443,445");
//! assert!(both.subtract(&ConnectionSet::all()).is_empty());
//! ```

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::core::error::Error;
use crate::validators;

/// Smallest valid TCP/UDP destination port
pub const MIN_PORT: u32 = 1;
/// Largest valid TCP/UDP destination port
pub const MAX_PORT: u32 = 65_535;
/// Largest encoded ICMP value (`type * 256 + code`)
pub const MAX_ICMP: u32 = 255 * 256 + 255;

/// Canonical set of inclusive `u32` intervals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntervalSet {
    ranges: Vec<(u32, u32)>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set holding the single interval `[start, end]`.
    /// An inverted interval yields the empty set.
    pub fn range(start: u32, end: u32) -> Self {
        if start > end {
            Self::new()
        } else {
            Self {
                ranges: vec![(start, end)],
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.ranges.iter().copied()
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut all: Vec<(u32, u32)> = self.ranges.iter().chain(&other.ranges).copied().collect();
        all.sort_unstable();

        let mut ranges: Vec<(u32, u32)> = Vec::with_capacity(all.len());
        for (start, end) in all {
            match ranges.last_mut() {
                Some(last) if start <= last.1.saturating_add(1) => last.1 = last.1.max(end),
                _ => ranges.push((start, end)),
            }
        }
        Self { ranges }
    }

    pub fn intersect(&self, other: &Self) -> Self {
        let mut ranges = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (a_start, a_end) = self.ranges[i];
            let (b_start, b_end) = other.ranges[j];
            let start = a_start.max(b_start);
            let end = a_end.min(b_end);
            if start <= end {
                ranges.push((start, end));
            }
            if a_end < b_end {
                i += 1;
            } else {
                j += 1;
            }
        }
        Self { ranges }
    }

    pub fn subtract(&self, other: &Self) -> Self {
        let mut ranges = Vec::new();
        let mut j = 0;
        for &(start, end) in &self.ranges {
            let mut cursor = start;
            let mut exhausted = false;
            while j < other.ranges.len() && other.ranges[j].1 < cursor {
                j += 1;
            }
            let mut k = j;
            while k < other.ranges.len() && other.ranges[k].0 <= end {
                let (b_start, b_end) = other.ranges[k];
                if b_start > cursor {
                    ranges.push((cursor, b_start - 1));
                }
                if b_end >= end {
                    exhausted = true;
                    break;
                }
                cursor = b_end + 1;
                k += 1;
            }
            if !exhausted {
                ranges.push((cursor, end));
            }
        }
        Self { ranges }
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.subtract(other).is_empty()
    }
}

/// Transport protocol dimension of a connection set
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Protocol {
    #[strum(serialize = "tcp")]
    Tcp,
    #[strum(serialize = "udp")]
    Udp,
    #[strum(serialize = "icmp")]
    Icmp,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmp => "ICMP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Immutable set of elementary connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionSet {
    tcp: IntervalSet,
    udp: IntervalSet,
    icmp: IntervalSet,
}

impl ConnectionSet {
    /// The empty set
    pub fn none() -> Self {
        Self::default()
    }

    /// The universe: every TCP/UDP port and every ICMP type/code
    pub fn all() -> Self {
        Self {
            tcp: IntervalSet::range(MIN_PORT, MAX_PORT),
            udp: IntervalSet::range(MIN_PORT, MAX_PORT),
            icmp: IntervalSet::range(0, MAX_ICMP),
        }
    }

    pub fn tcp(ports: PortRange) -> Self {
        Self {
            tcp: port_interval(ports),
            ..Self::none()
        }
    }

    pub fn udp(ports: PortRange) -> Self {
        Self {
            udp: port_interval(ports),
            ..Self::none()
        }
    }

    /// ICMP of the given type; `code == None` matches every code.
    pub fn icmp(icmp_type: u8, code: Option<u8>) -> Self {
        let base = u32::from(icmp_type) * 256;
        let icmp = match code {
            Some(c) => IntervalSet::range(base + u32::from(c), base + u32::from(c)),
            None => IntervalSet::range(base, base + 255),
        };
        Self {
            icmp,
            ..Self::none()
        }
    }

    pub fn all_tcp() -> Self {
        Self::tcp(PortRange::new(1, u16::MAX))
    }

    pub fn all_udp() -> Self {
        Self::udp(PortRange::new(1, u16::MAX))
    }

    pub fn all_icmp() -> Self {
        Self {
            icmp: IntervalSet::range(0, MAX_ICMP),
            ..Self::none()
        }
    }

    /// Set covering every elementary connection of one protocol.
    pub fn all_of(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Tcp => Self::all_tcp(),
            Protocol::Udp => Self::all_udp(),
            Protocol::Icmp => Self::all_icmp(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tcp.is_empty() && self.udp.is_empty() && self.icmp.is_empty()
    }

    pub fn is_all(&self) -> bool {
        *self == Self::all()
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            tcp: self.tcp.union(&other.tcp),
            udp: self.udp.union(&other.udp),
            icmp: self.icmp.union(&other.icmp),
        }
    }

    pub fn intersect(&self, other: &Self) -> Self {
        Self {
            tcp: self.tcp.intersect(&other.tcp),
            udp: self.udp.intersect(&other.udp),
            icmp: self.icmp.intersect(&other.icmp),
        }
    }

    pub fn subtract(&self, other: &Self) -> Self {
        Self {
            tcp: self.tcp.subtract(&other.tcp),
            udp: self.udp.subtract(&other.udp),
            icmp: self.icmp.subtract(&other.icmp),
        }
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.tcp.is_subset(&other.tcp)
            && self.udp.is_subset(&other.udp)
            && self.icmp.is_subset(&other.icmp)
    }

    pub fn intersects(&self, other: &Self) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Union of an iterator of sets.
    pub fn union_all<'a>(sets: impl IntoIterator<Item = &'a ConnectionSet>) -> Self {
        sets.into_iter()
            .fold(Self::none(), |acc, conn| acc.union(conn))
    }
}

fn port_interval(ports: PortRange) -> IntervalSet {
    IntervalSet::range(
        u32::from(ports.start).max(MIN_PORT),
        u32::from(ports.end),
    )
}

fn write_ports(f: &mut fmt::Formatter<'_>, ports: &IntervalSet) -> fmt::Result {
    let mut first = true;
    for (start, end) in ports.iter() {
        if !first {
            write!(f, ",")?;
        }
        first = false;
        if start == end {
            write!(f, "{start}")?;
        } else {
            write!(f, "{start}-{end}")?;
        }
    }
    Ok(())
}

fn write_icmp(f: &mut fmt::Formatter<'_>, icmp: &IntervalSet) -> fmt::Result {
    let mut first = true;
    for (start, end) in icmp.iter() {
        if !first {
            write!(f, ", ")?;
        }
        first = false;
        let (t1, c1) = (start / 256, start % 256);
        let (t2, c2) = (end / 256, end % 256);
        if c1 == 0 && c2 == 255 {
            if t1 == t2 {
                write!(f, "type {t1}")?;
            } else {
                write!(f, "type {t1}-{t2}")?;
            }
        } else if t1 == t2 {
            if c1 == c2 {
                write!(f, "type {t1} code {c1}")?;
            } else {
                write!(f, "type {t1} code {c1}-{c2}")?;
            }
        } else {
            write!(f, "type {t1} code {c1} to type {t2} code {c2}")?;
        }
    }
    Ok(())
}

impl fmt::Display for ConnectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            return write!(f, "All Connections");
        }
        if self.is_empty() {
            return write!(f, "No Connections");
        }

        let full_ports = IntervalSet::range(MIN_PORT, MAX_PORT);
        let mut first = true;
        for (name, ports) in [("TCP", &self.tcp), ("UDP", &self.udp)] {
            if ports.is_empty() {
                continue;
            }
            if !first {
                write!(f, "; ")?;
            }
            first = false;
            write!(f, "{name}")?;
            if *ports != full_ports {
                write!(f, " ")?;
                write_ports(f, ports)?;
            }
        }
        if !self.icmp.is_empty() {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "ICMP")?;
            if self.icmp != IntervalSet::range(0, MAX_ICMP) {
                write!(f, " ")?;
                write_icmp(f, &self.icmp)?;
            }
        }
        Ok(())
    }
}

impl Serialize for ConnectionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parses a single numeric token of a connection spec.
fn parse_number(token: &str, spec: &str) -> Result<u32, Error> {
    token
        .trim()
        .parse::<u32>()
        .map_err(|_| Error::InvalidConnection(spec.to_string()))
}

fn parse_ports(token: &str, spec: &str) -> Result<PortRange, Error> {
    let (start, end) = match token.split_once('-') {
        Some((s, e)) => (parse_number(s, spec)?, parse_number(e, spec)?),
        None => {
            let p = parse_number(token, spec)?;
            (p, p)
        }
    };
    let start = u16::try_from(start).map_err(|_| Error::InvalidConnection(spec.to_string()))?;
    let end = u16::try_from(end).map_err(|_| Error::InvalidConnection(spec.to_string()))?;
    let (start, end) = validators::validate_port_range(start, end)
        .map_err(|e| Error::InvalidConnection(format!("{spec}: {e}")))?;
    Ok(PortRange::new(start, end))
}

/// Parses one comma-separated item such as `tcp/445`, `icmp/8/0` or `any`.
fn parse_item(item: &str) -> Result<ConnectionSet, Error> {
    let lowered = item.trim().to_ascii_lowercase();
    if matches!(lowered.as_str(), "all" | "any" | "*") {
        return Ok(ConnectionSet::all());
    }

    let mut parts = lowered.split('/');
    let protocol: Protocol = parts
        .next()
        .unwrap_or_default()
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConnection(item.to_string()))?;
    let rest: Vec<&str> = parts.collect();

    match (protocol, rest.as_slice()) {
        (_, []) => Ok(ConnectionSet::all_of(protocol)),
        (Protocol::Tcp, [ports]) => Ok(ConnectionSet::tcp(parse_ports(ports, item)?)),
        (Protocol::Udp, [ports]) => Ok(ConnectionSet::udp(parse_ports(ports, item)?)),
        (Protocol::Icmp, [icmp_type]) => {
            let (t, _) = validators::validate_icmp(parse_number(icmp_type, item)?, None)
                .map_err(|e| Error::InvalidConnection(format!("{item}: {e}")))?;
            Ok(ConnectionSet::icmp(t, None))
        }
        (Protocol::Icmp, [icmp_type, code]) => {
            let (t, c) = validators::validate_icmp(
                parse_number(icmp_type, item)?,
                Some(parse_number(code, item)?),
            )
            .map_err(|e| Error::InvalidConnection(format!("{item}: {e}")))?;
            Ok(ConnectionSet::icmp(t, c))
        }
        _ => Err(Error::InvalidConnection(item.to_string())),
    }
}

impl FromStr for ConnectionSet {
    type Err = Error;

    /// Parses the compact connection syntax: `tcp/445`, `udp/53-60`,
    /// `icmp/8/0`, `icmp/8`, `icmp`, `tcp`, `all`/`any`, comma-separated.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(Error::InvalidConnection(s.to_string()));
        }
        s.split(',')
            .map(parse_item)
            .try_fold(ConnectionSet::none(), |acc, item| Ok(acc.union(&item?)))
    }
}
