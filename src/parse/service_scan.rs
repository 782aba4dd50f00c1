//! Service scan artifact parsing.
//!
//! The scanner writes one set of artifacts per target and protocol, named
//! `nmap.<address>-<protocol>.<ext>`. The part worth storing is the port
//! table: everything after the `PORT STATE SERVICE` header and before the
//! `Service detection performed` footer.

use super::ParseAnomaly;

/// Every one of these must appear on the header line.
pub const START_MARKER_FIELDS: [&str; 3] = ["PORT", "STATE", "SERVICE"];

/// Substring identifying the footer line.
pub const END_MARKER: &str = "Service detection performed";

/// Address and protocol recovered from an artifact file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub address: String,
    pub protocol: String,
    pub extension: String,
}

impl ArtifactName {
    /// Parse `<prefix>.<address>-<protocol>.<ext>`.
    ///
    /// The protocol is split off at the last `-`, so IPv6 addresses (which
    /// never contain `-`) survive intact.
    pub fn parse(file_name: &str, prefix: &str) -> Option<Self> {
        let rest = file_name.strip_prefix(prefix)?.strip_prefix('.')?;
        let (stem, extension) = rest.rsplit_once('.')?;
        let (address, protocol) = stem.rsplit_once('-')?;
        if address.is_empty() || protocol.is_empty() || extension.is_empty() {
            return None;
        }
        Some(Self {
            address: address.to_string(),
            protocol: protocol.to_string(),
            extension: extension.to_string(),
        })
    }

    /// Artifact base path component, without extension.
    pub fn base(prefix: &str, address: &str, protocol: &str) -> String {
        format!("{}.{}-{}", prefix, address, protocol)
    }
}

/// Body captured from one service scan artifact.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceBody {
    pub lines: Vec<String>,
    pub start_found: bool,
    pub end_found: bool,
}

impl ServiceBody {
    /// Body joined with newlines, as stored.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Anomaly to report for this body, if any.
    pub fn anomaly(&self, artifact: &str) -> Option<ParseAnomaly> {
        if !self.start_found {
            Some(ParseAnomaly::MissingStartMarker {
                artifact: artifact.to_string(),
            })
        } else if !self.end_found {
            Some(ParseAnomaly::MissingEndMarker {
                artifact: artifact.to_string(),
            })
        } else {
            None
        }
    }
}

fn is_start_marker(line: &str) -> bool {
    START_MARKER_FIELDS.iter().all(|field| line.contains(field))
}

/// Extract the lines between the header and footer.
///
/// Neither marker line is part of the body. A later header after a footer
/// resumes capture. Without a header the body is empty.
pub fn extract_service_body(text: &str) -> ServiceBody {
    let mut body = ServiceBody::default();
    let mut capturing = false;

    for line in text.lines() {
        if capturing {
            if line.contains(END_MARKER) {
                capturing = false;
                body.end_found = true;
            } else {
                body.lines.push(line.to_string());
            }
        } else if is_start_marker(line) {
            capturing = true;
            body.start_found = true;
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "PORT   STATE SERVICE VERSION";
    const FOOTER: &str =
        "Service detection performed. Please report any incorrect results at https://nmap.org/submit/ .";

    #[test]
    fn test_artifact_name_ipv4() {
        let name = ArtifactName::parse("nmap.10.10.10.5-tcp.nmap", "nmap").unwrap();
        assert_eq!(name.address, "10.10.10.5");
        assert_eq!(name.protocol, "tcp");
        assert_eq!(name.extension, "nmap");
    }

    #[test]
    fn test_artifact_name_ipv6() {
        let name = ArtifactName::parse("nmap.fe80::1-udp.xml", "nmap").unwrap();
        assert_eq!(name.address, "fe80::1");
        assert_eq!(name.protocol, "udp");
        assert_eq!(name.extension, "xml");
    }

    #[test]
    fn test_artifact_name_rejects_other_shapes() {
        assert!(ArtifactName::parse("nmap.10.10.10.5.nmap", "nmap").is_none());
        assert!(ArtifactName::parse("masscan.10.10.10.5-tcp.nmap", "nmap").is_none());
        assert!(ArtifactName::parse("nmap.-tcp.nmap", "nmap").is_none());
    }

    #[test]
    fn test_body_is_exactly_the_lines_between_markers() {
        let body_lines = ["22/tcp open  ssh  OpenSSH 7.6p1", "80/tcp open  http nginx 1.14.0"];
        let text = format!(
            "# Nmap 7.80 scan\nHost is up.\n{}\n{}\n{}\n{}\n# Nmap done\n",
            HEADER, body_lines[0], body_lines[1], FOOTER
        );

        let body = extract_service_body(&text);

        assert_eq!(body.lines, body_lines);
        assert!(body.start_found && body.end_found);
        assert!(body.anomaly("a").is_none());
    }

    #[test]
    fn test_body_property_over_varied_surroundings() {
        for n in 0..6 {
            for noise in ["", "junk\n", "Starting Nmap\nHost is up\n\n"] {
                let lines: Vec<String> = (0..n).map(|i| format!("{}/tcp open svc{}", i, i)).collect();
                let mut text = String::from(noise);
                text.push_str(HEADER);
                text.push('\n');
                for line in &lines {
                    text.push_str(line);
                    text.push('\n');
                }
                text.push_str(FOOTER);
                text.push('\n');
                text.push_str(noise);

                assert_eq!(extract_service_body(&text).lines, lines, "n={} noise={:?}", n, noise);
            }
        }
    }

    #[test]
    fn test_missing_start_marker_yields_empty_body() {
        let body = extract_service_body("Host seems down.\nService detection performed.\n");

        assert!(body.lines.is_empty());
        assert_eq!(body.text(), "");
        assert!(matches!(
            body.anomaly("nmap.10.10.10.5-tcp.nmap"),
            Some(ParseAnomaly::MissingStartMarker { .. })
        ));
    }

    #[test]
    fn test_missing_end_marker_runs_to_eof() {
        let text = format!("{}\n22/tcp open ssh\n", HEADER);

        let body = extract_service_body(&text);

        assert_eq!(body.lines, vec!["22/tcp open ssh"]);
        assert!(matches!(
            body.anomaly("x"),
            Some(ParseAnomaly::MissingEndMarker { .. })
        ));
    }
}
