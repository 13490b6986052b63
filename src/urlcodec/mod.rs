//! Proxy URL codec.
//!
//! # Responsibilities
//! - Encode a destination URL plus proxy metadata into the proxy URL grammar
//! - Parse proxy URLs back into their structured form
//! - Rewrite individual destination parts (for `Location`/`Refresh` values)
//!
//! # Grammar
//! ```text
//! http(s)://<proxyHost>:<proxyPort>/<sessionId>[*<windowId>][!<flags><cred?>][!<charset|reqOrigin>]/<destUrl-verbatim>
//! ```
//! The destination URL is appended verbatim, never percent-encoded, so the
//! parser splits the descriptor segment greedily at the first `/` and treats
//! the entire remainder as the destination, `?` and `#` included.

pub mod dest;
pub mod flags;

pub use dest::{default_port, is_supported_scheme, resolve, DestUrl};
pub use flags::{Credentials, ResourceFlags};

/// `about:` pseudo-URLs served from a static body, never fetched upstream.
pub const SPECIAL_PAGES: &[&str] = &["about:blank", "about:error"];

pub fn is_special_page(url: &str) -> bool {
    SPECIAL_PAGES.contains(&url)
}

/// Proxy endpoint a parsed URL pointed at (absent when only a path was
/// available, e.g. the request line of an incoming request).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub protocol: String,
    pub hostname: String,
    pub port: u16,
}

/// Structured form of a proxy URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyUrl {
    pub proxy: Option<ProxyEndpoint>,
    pub session_id: String,
    pub window_id: Option<String>,
    pub flags: ResourceFlags,
    pub credentials: Option<Credentials>,
    pub charset: Option<String>,
    pub req_origin: Option<String>,
    /// The destination URL exactly as it appeared after the descriptor.
    pub dest_url: String,
}

impl ProxyUrl {
    /// Structured view of the destination, when it is not a special page.
    pub fn dest(&self) -> Option<DestUrl> {
        DestUrl::parse(&self.dest_url)
    }

    pub fn is_special_page(&self) -> bool {
        is_special_page(&self.dest_url)
    }
}

/// Options for [`format_proxy_url`].
#[derive(Debug, Clone, Default)]
pub struct ProxyUrlOptions {
    pub proxy_hostname: String,
    pub proxy_port: u16,
    /// `http` or `https`.
    pub proxy_protocol: String,
    pub session_id: String,
    pub window_id: Option<String>,
    pub flags: ResourceFlags,
    pub credentials: Option<Credentials>,
    pub charset: Option<String>,
    pub req_origin: Option<String>,
}

impl ProxyUrlOptions {
    pub fn new(hostname: &str, port: u16, session_id: &str) -> Self {
        ProxyUrlOptions {
            proxy_hostname: hostname.to_string(),
            proxy_port: port,
            proxy_protocol: "http".to_string(),
            session_id: session_id.to_string(),
            ..ProxyUrlOptions::default()
        }
    }
}

/// Format a destination URL as a proxy URL.
///
/// The destination is normalized the minimal amount the grammar requires:
/// lower-cased scheme and host, default port stripped, and a bare origin
/// gains a trailing slash so that re-proxying the result is idempotent.
/// Unsupported destinations are returned unchanged.
pub fn format_proxy_url(dest_url: &str, opts: &ProxyUrlOptions) -> String {
    let dest = if is_special_page(dest_url) {
        dest_url.to_string()
    } else {
        match DestUrl::parse(dest_url) {
            Some(parsed) if parsed.is_bare_origin() => format!("{}/", parsed.format()),
            Some(parsed) => parsed.format(),
            None => return dest_url.to_string(),
        }
    };

    let mut descriptor = String::from(&opts.session_id);
    if let Some(ref window_id) = opts.window_id {
        descriptor.push('*');
        descriptor.push_str(window_id);
    }

    let has_flag_segment = !opts.flags.is_empty() || opts.credentials.is_some();
    if has_flag_segment {
        descriptor.push('!');
        descriptor.push_str(&opts.flags.encode());
        if let Some(credentials) = opts.credentials {
            descriptor.push(credentials.to_digit());
        }

        // The trailing descriptor value is only meaningful together with
        // flags: a charset for processable resources, a request origin for
        // CORS-bearing ones.
        if opts.flags.carries_req_origin() {
            if let Some(ref origin) = opts.req_origin {
                descriptor.push('!');
                descriptor.push_str(&encode_component(origin));
            }
        } else if let Some(ref charset) = opts.charset {
            descriptor.push('!');
            descriptor.push_str(charset);
        }
    }

    format!(
        "{}://{}:{}/{}/{}",
        opts.proxy_protocol, opts.proxy_hostname, opts.proxy_port, descriptor, dest
    )
}

/// Resource-type-aware variant of [`format_proxy_url`]: iframe and HTML
/// import resources whose origin differs from the referring page's origin
/// route through the cross-domain proxy port, preserving the browser's
/// origin partitioning.
pub fn get_proxy_url(
    dest_url: &str,
    opts: &ProxyUrlOptions,
    page_origin: Option<&str>,
    cross_domain_port: Option<u16>,
) -> String {
    if (opts.flags.iframe || opts.flags.html_import) && cross_domain_port.is_some() {
        if let (Some(dest), Some(page_origin)) = (DestUrl::parse(dest_url), page_origin) {
            if !origins_match(&dest.origin(), page_origin) {
                let mut cross = opts.clone();
                cross.proxy_port = cross_domain_port.unwrap_or(opts.proxy_port);
                return format_proxy_url(dest_url, &cross);
            }
        }
    }
    format_proxy_url(dest_url, opts)
}

/// Compare two origins after normalization (case, default port).
pub fn origins_match(a: &str, b: &str) -> bool {
    let norm = |s: &str| DestUrl::parse(s).map(|d| d.origin()).unwrap_or_else(|| s.to_string());
    norm(a) == norm(b)
}

/// Parse a proxy URL (either a full URL or just the path-and-query of an
/// incoming request). Returns `None` when the input does not match the proxy
/// grammar.
pub fn parse_proxy_url(url: &str) -> Option<ProxyUrl> {
    let (proxy, path) = split_proxy_endpoint(url)?;

    let path = path.strip_prefix('/')?;
    let (descriptor, dest_raw) = path.split_once('/')?;

    let dest_url = dest_raw.to_string();
    if !is_special_page(&dest_url) && DestUrl::parse(&dest_url).is_none() {
        return None;
    }

    let mut segments = descriptor.split('!');
    let id_part = segments.next()?;

    let (session_id, window_id) = match id_part.split_once('*') {
        Some((sid, wid)) => (sid.to_string(), Some(wid.to_string())),
        None => (id_part.to_string(), None),
    };
    if !is_valid_id(&session_id) || !window_id.as_deref().map_or(true, is_valid_id) {
        return None;
    }

    let mut flags = ResourceFlags::none();
    let mut credentials = None;
    let mut charset = None;
    let mut req_origin = None;

    if let Some(flag_part) = segments.next() {
        let (flag_chars, cred) = match flag_part.chars().last().and_then(Credentials::from_digit) {
            Some(c) => (&flag_part[..flag_part.len() - 1], Some(c)),
            None => (flag_part, None),
        };
        flags = ResourceFlags::decode(flag_chars)?;
        credentials = cred;

        if let Some(extra) = segments.next() {
            if flags.carries_req_origin() {
                req_origin = Some(decode_component(extra));
            } else {
                charset = Some(extra.to_string());
            }
        }
    }

    if segments.next().is_some() {
        return None;
    }

    Some(ProxyUrl {
        proxy,
        session_id,
        window_id,
        flags,
        credentials,
        charset,
        req_origin,
        dest_url,
    })
}

/// Structural parts of the destination that [`change_dest_url_part`] can
/// replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestUrlPart {
    Scheme,
    Host,
    Port,
    Pathname,
    Search,
}

/// Decompose a proxy URL, replace one structural part of the destination,
/// and re-encode with the same session and flag context. Used for rewriting
/// `Location`/`Refresh` headers whose destination differs from the request's.
pub fn change_dest_url_part(proxy_url: &str, part: DestUrlPart, value: &str) -> Option<String> {
    let parsed = parse_proxy_url(proxy_url)?;
    let mut dest = parsed.dest()?;

    match part {
        DestUrlPart::Scheme => dest.scheme = value.trim_end_matches(':').to_ascii_lowercase(),
        DestUrlPart::Host => dest.host = Some(value.to_ascii_lowercase()),
        DestUrlPart::Port => {
            dest.port = value
                .parse::<u16>()
                .ok()
                .filter(|p| Some(*p) != default_port(&dest.scheme));
        }
        DestUrlPart::Pathname => {
            let tail_start = dest
                .partial
                .find(|c| c == '?' || c == '#')
                .unwrap_or(dest.partial.len());
            dest.partial = format!("{}{}", value, &dest.partial[tail_start..]);
        }
        DestUrlPart::Search => {
            let path = dest.path().to_string();
            let hash = dest.partial.find('#').map(|i| dest.partial[i..].to_string());
            dest.partial = format!("{}{}{}", path, value, hash.unwrap_or_default());
        }
    }

    let endpoint = parsed.proxy.as_ref()?;
    let opts = ProxyUrlOptions {
        proxy_hostname: endpoint.hostname.clone(),
        proxy_port: endpoint.port,
        proxy_protocol: endpoint.protocol.clone(),
        session_id: parsed.session_id.clone(),
        window_id: parsed.window_id.clone(),
        flags: parsed.flags,
        credentials: parsed.credentials,
        charset: parsed.charset.clone(),
        req_origin: parsed.req_origin.clone(),
    };
    Some(format_proxy_url(&dest.format(), &opts))
}

/// A bare origin gains a trailing slash; anything else is left alone.
/// `open_session` runs entry URLs through this so the first navigation and
/// any later re-proxying of it produce the same proxy URL.
pub fn ensure_trailing_slash(url: &str) -> String {
    match DestUrl::parse(url) {
        Some(parsed) if parsed.is_bare_origin() => format!("{}/", parsed.format()),
        Some(parsed) => parsed.format(),
        None => url.to_string(),
    }
}

fn split_proxy_endpoint(url: &str) -> Option<(Option<ProxyEndpoint>, &str)> {
    for (prefix, protocol, scheme_default) in
        [("http://", "http", 80u16), ("https://", "https", 443u16)]
    {
        if let Some(rest) = url.strip_prefix(prefix) {
            let authority_end = rest.find('/').unwrap_or(rest.len());
            let authority = &rest[..authority_end];
            let (hostname, port) = match authority.rsplit_once(':') {
                Some((h, p)) => (h.to_string(), p.parse().ok()?),
                None => (authority.to_string(), scheme_default),
            };
            return Some((
                Some(ProxyEndpoint {
                    protocol: protocol.to_string(),
                    hostname,
                    port,
                }),
                &rest[authority_end..],
            ));
        }
    }
    if url.starts_with('/') {
        return Some((None, url));
    }
    None
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn decode_component(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(h), Some(l)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((h * 16 + l) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
