//! XML scan output: document tree conversion and host summary extraction.
//!
//! The XML is first turned into a JSON tree in which an element that appears
//! once is an object and an element that repeats is an array. Extraction then
//! normalizes those shapes in one place (`as_list`) before filtering.

use roxmltree::{Document, Node, ParsingOptions};
use serde_json::{Map, Value};

use crate::types::{HostStatus, OpenPort, ScanSummary, ScriptFinding, SummaryReport};

/// Parse XML into a JSON document tree.
///
/// - attributes become `@name` keys
/// - non-blank text becomes `#text`, or the whole value for a bare text element
/// - repeated child elements collapse into an array in document order
/// - empty elements become `null`
pub fn xml_to_tree(xml: &str) -> Result<Value, roxmltree::Error> {
    let mut opts = ParsingOptions::default();
    // nmap emits `<!DOCTYPE nmaprun>`.
    opts.allow_dtd = true;
    let doc = Document::parse_with_options(xml, opts)?;
    let root = doc.root_element();
    let mut top = Map::new();
    top.insert(root.tag_name().name().to_string(), element_to_value(root));
    Ok(Value::Object(top))
}

fn element_to_value(node: Node) -> Value {
    let mut map = Map::new();
    for attr in node.attributes() {
        map.insert(format!("@{}", attr.name()), Value::String(attr.value().to_string()));
    }

    let mut text = String::new();
    for child in node.children() {
        if child.is_element() {
            let key = child.tag_name().name().to_string();
            let value = element_to_value(child);
            match map.get_mut(&key) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(key, value);
                }
            }
        } else if child.is_text() {
            text.push_str(child.text().unwrap_or_default());
        }
    }

    let text = text.trim();
    if map.is_empty() {
        return if text.is_empty() {
            Value::Null
        } else {
            Value::String(text.to_string())
        };
    }
    if !text.is_empty() {
        map.insert("#text".to_string(), Value::String(text.to_string()));
    }
    Value::Object(map)
}

/// Absent, single or repeated: always a list.
fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}

fn attr(value: &Value, name: &str) -> String {
    value
        .get(format!("@{name}"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Reduce a document tree to the first host's status, address and open ports.
pub fn extract_summary(tree: &Value) -> ScanSummary {
    let hosts = as_list(tree.get("nmaprun").and_then(|run| run.get("host")));
    let Some(host) = hosts.first() else {
        return ScanSummary::default();
    };

    let status = host
        .get("status")
        .map(|s| HostStatus::from_state(&attr(s, "state")))
        .unwrap_or_default();

    let addresses = as_list(host.get("address"));
    let address = addresses
        .iter()
        .find(|a| matches!(attr(a, "addrtype").as_str(), "ipv4" | "ipv6"))
        .or_else(|| addresses.first())
        .map(|a| attr(a, "addr"))
        .unwrap_or_default();

    let hostnames = as_list(host.get("hostnames").and_then(|h| h.get("hostname")))
        .into_iter()
        .map(|h| attr(h, "name"))
        .filter(|n| !n.is_empty())
        .collect();

    let mut open_ports = Vec::new();
    let mut script_findings = Vec::new();
    for port in as_list(host.get("ports").and_then(|p| p.get("port"))) {
        let state = port.get("state").map(|s| attr(s, "state")).unwrap_or_default();
        if state != "open" {
            continue;
        }
        let portid = attr(port, "portid");
        let service = port.get("service");
        let service_attr = |name: &str| service.map(|s| attr(s, name)).unwrap_or_default();
        open_ports.push(OpenPort {
            port: portid.clone(),
            protocol: attr(port, "protocol"),
            service: service_attr("name"),
            product: service_attr("product"),
            version: service_attr("version"),
            extrainfo: service_attr("extrainfo"),
        });
        for script in as_list(port.get("script")) {
            script_findings.push(ScriptFinding {
                port: portid.clone(),
                script_id: attr(script, "id"),
                output: attr(script, "output"),
            });
        }
    }

    ScanSummary {
        address,
        hostnames,
        status,
        total_open: open_ports.len(),
        open_ports,
        script_findings,
    }
}

/// Parse and summarize in one step. A malformed document yields no tree and
/// an error-shaped summary.
pub fn parse_and_summarize(xml: &str) -> (Option<Value>, SummaryReport) {
    match xml_to_tree(xml) {
        Ok(tree) => {
            let summary = extract_summary(&tree);
            (Some(tree), SummaryReport::Summary(summary))
        }
        Err(e) => (None, SummaryReport::error(format!("failed to parse XML output: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_PORTS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<?xml-stylesheet href="file:///usr/share/nmap/nmap.xsl" type="text/xsl"?>
<nmaprun scanner="nmap" args="nmap -sV --script http-title -oX - scanme.nmap.org">
  <host starttime="1" endtime="2">
    <status state="up" reason="syn-ack" reason_ttl="0"/>
    <address addr="45.33.32.156" addrtype="ipv4"/>
    <hostnames>
      <hostname name="scanme.nmap.org" type="user"/>
      <hostname name="scanme.nmap.org" type="PTR"/>
    </hostnames>
    <ports>
      <extraports state="closed" count="996"/>
      <port protocol="tcp" portid="22">
        <state state="open" reason="syn-ack" reason_ttl="0"/>
        <service name="ssh" product="OpenSSH" version="6.6.1p1" extrainfo="Ubuntu 2ubuntu2.13" method="probed" conf="10"/>
      </port>
      <port protocol="tcp" portid="80">
        <state state="open" reason="syn-ack" reason_ttl="0"/>
        <service name="http" product="Apache httpd" version="2.4.7" method="probed" conf="10"/>
        <script id="http-title" output="Go ahead and ScanMe!"><elem key="title">Go ahead and ScanMe!</elem></script>
      </port>
      <port protocol="tcp" portid="25">
        <state state="filtered" reason="no-response" reason_ttl="0"/>
        <service name="smtp" method="table" conf="3"/>
      </port>
    </ports>
  </host>
  <runstats><finished time="3" summary="done"/><hosts up="1" down="0" total="1"/></runstats>
</nmaprun>"#;

    #[test]
    fn tree_keeps_singular_and_list_shapes() {
        let tree = xml_to_tree(TWO_PORTS).unwrap();
        let host = &tree["nmaprun"]["host"];
        assert!(host.is_object());
        assert!(host["ports"]["port"].is_array());
        assert!(host["address"].is_object());
        assert_eq!(host["address"]["@addr"], "45.33.32.156");
        assert_eq!(host["ports"]["port"][1]["script"]["elem"]["#text"], "Go ahead and ScanMe!");
    }

    #[test]
    fn summary_lists_open_ports_with_service_details() {
        let tree = xml_to_tree(TWO_PORTS).unwrap();
        let s = extract_summary(&tree);
        assert_eq!(s.status, HostStatus::Up);
        assert_eq!(s.address, "45.33.32.156");
        assert_eq!(s.hostnames, vec!["scanme.nmap.org", "scanme.nmap.org"]);
        assert_eq!(s.total_open, 2);
        assert_eq!(s.open_ports[0].port, "22");
        assert_eq!(s.open_ports[0].product, "OpenSSH");
        assert_eq!(s.open_ports[0].extrainfo, "Ubuntu 2ubuntu2.13");
        assert_eq!(s.open_ports[1].service, "http");
        assert_eq!(s.open_ports[1].extrainfo, "");
        assert_eq!(
            s.script_findings,
            vec![ScriptFinding {
                port: "80".into(),
                script_id: "http-title".into(),
                output: "Go ahead and ScanMe!".into(),
            }]
        );
    }

    #[test]
    fn single_open_port_is_normalized() {
        let xml = r#"<nmaprun><host><status state="up"/><address addr="10.0.0.5" addrtype="ipv4"/>
            <ports><port protocol="tcp" portid="443"><state state="open"/></port></ports></host></nmaprun>"#;
        let s = extract_summary(&xml_to_tree(xml).unwrap());
        assert_eq!(s.open_ports.len(), 1);
        assert_eq!(s.open_ports[0].port, "443");
        assert_eq!(s.open_ports[0].service, "");
        assert!(s.script_findings.is_empty());
    }

    #[test]
    fn no_ports_is_empty_not_error() {
        let xml = r#"<nmaprun><host><status state="down"/><address addr="10.0.0.6" addrtype="ipv4"/></host></nmaprun>"#;
        let (tree, report) = parse_and_summarize(xml);
        assert!(tree.is_some());
        let s = report.summary().unwrap();
        assert_eq!(s.status, HostStatus::Down);
        assert!(s.open_ports.is_empty());
        assert_eq!(s.total_open, 0);
    }

    #[test]
    fn mac_address_is_not_preferred() {
        let xml = r#"<nmaprun><host><status state="up"/>
            <address addr="AA:BB:CC:DD:EE:FF" addrtype="mac"/><address addr="192.168.1.7" addrtype="ipv4"/>
            </host></nmaprun>"#;
        assert_eq!(extract_summary(&xml_to_tree(xml).unwrap()).address, "192.168.1.7");
    }

    #[test]
    fn missing_host_is_unknown() {
        let s = extract_summary(&xml_to_tree("<nmaprun/>").unwrap());
        assert_eq!(s.status, HostStatus::Unknown);
        assert_eq!(s.address, "");
    }

    #[test]
    fn malformed_xml_yields_error_marker() {
        let (tree, report) = parse_and_summarize("<nmaprun><host></nmaprun>");
        assert!(tree.is_none());
        match report {
            SummaryReport::Error(e) => {
                assert!(e.error);
                assert!(e.details.starts_with("failed to parse XML output"));
            }
            SummaryReport::Summary(_) => panic!("expected error marker"),
        }
    }
}
