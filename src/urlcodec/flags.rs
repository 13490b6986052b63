//! Resource-type flags and credentials mode carried in the proxy URL
//! descriptor segment.

/// Credentials mode of the request that produced a proxy URL, mirroring the
/// fetch spec's credentials enum. Encoded as a single digit appended to the
/// flag characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credentials {
    Include,
    SameOrigin,
    Omit,
}

impl Credentials {
    pub fn to_digit(self) -> char {
        match self {
            Credentials::Include => '0',
            Credentials::SameOrigin => '1',
            Credentials::Omit => '2',
        }
    }

    pub fn from_digit(c: char) -> Option<Credentials> {
        match c {
            '0' => Some(Credentials::Include),
            '1' => Some(Credentials::SameOrigin),
            '2' => Some(Credentials::Omit),
            _ => None,
        }
    }
}

/// Resource classification flags. Combinable; encoded as a fixed-order run of
/// single characters in the descriptor segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceFlags {
    pub iframe: bool,
    pub form: bool,
    pub script: bool,
    pub stylesheet: bool,
    pub html_import: bool,
    pub web_socket: bool,
    pub service_worker: bool,
    pub event_source: bool,
    pub ajax: bool,
}

impl ResourceFlags {
    pub const IFRAME: ResourceFlags = ResourceFlags {
        iframe: true,
        ..ResourceFlags::none()
    };
    pub const SCRIPT: ResourceFlags = ResourceFlags {
        script: true,
        ..ResourceFlags::none()
    };
    pub const STYLESHEET: ResourceFlags = ResourceFlags {
        stylesheet: true,
        ..ResourceFlags::none()
    };
    pub const AJAX: ResourceFlags = ResourceFlags {
        ajax: true,
        ..ResourceFlags::none()
    };
    pub const FORM: ResourceFlags = ResourceFlags {
        form: true,
        ..ResourceFlags::none()
    };
    pub const WEB_SOCKET: ResourceFlags = ResourceFlags {
        web_socket: true,
        ..ResourceFlags::none()
    };

    pub const fn none() -> ResourceFlags {
        ResourceFlags {
            iframe: false,
            form: false,
            script: false,
            stylesheet: false,
            html_import: false,
            web_socket: false,
            service_worker: false,
            event_source: false,
            ajax: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == ResourceFlags::none()
    }

    /// The descriptor's charset slot is reused as a request origin for
    /// resource types that need CORS context.
    pub fn carries_req_origin(&self) -> bool {
        self.ajax || self.web_socket || self.event_source
    }

    /// Encode as the fixed-order character run used in proxy URLs.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (set, c) in [
            (self.iframe, 'i'),
            (self.form, 'f'),
            (self.script, 's'),
            (self.stylesheet, 'l'),
            (self.html_import, 'h'),
            (self.web_socket, 'w'),
            (self.service_worker, 'r'),
            (self.event_source, 'e'),
            (self.ajax, 'a'),
        ] {
            if set {
                out.push(c);
            }
        }
        out
    }

    /// Decode a run of flag characters. Returns `None` on any unknown
    /// character so descriptor parsing can reject garbage segments.
    pub fn decode(s: &str) -> Option<ResourceFlags> {
        let mut flags = ResourceFlags::none();
        for c in s.chars() {
            match c {
                'i' => flags.iframe = true,
                'f' => flags.form = true,
                's' => flags.script = true,
                'l' => flags.stylesheet = true,
                'h' => flags.html_import = true,
                'w' => flags.web_socket = true,
                'r' => flags.service_worker = true,
                'e' => flags.event_source = true,
                'a' => flags.ajax = true,
                _ => return None,
            }
        }
        Some(flags)
    }
}
