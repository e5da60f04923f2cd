use crate::daemon::DaemonConfig;

/// Cross-field validation run after parse. Any failure here is a fatal
/// configuration error (exit code 1).
pub fn validate(config: &DaemonConfig) -> anyhow::Result<()> {
    validate_listen(&config.worker.listen, "tcp")?;
    validate_listen(&config.fuzzy.listen, "udp")?;

    // Symbols must reference existing groups.
    for (name, sym) in &config.scan.symbols {
        if let Some(group) = &sym.group
            && !config.scan.groups.contains_key(group)
        {
            anyhow::bail!("symbol {name} references unknown group {group:?}");
        }
    }
    for (name, composite) in &config.scan.composites {
        if let Some(group) = &composite.group
            && !config.scan.groups.contains_key(group)
        {
            anyhow::bail!("composite {name} references unknown group {group:?}");
        }
        if composite.expression.trim().is_empty() {
            anyhow::bail!("composite {name} has an empty expression");
        }
    }
    for (name, group) in &config.scan.groups {
        if group.max_score < 0.0 {
            anyhow::bail!("group {name} has negative max_score {}", group.max_score);
        }
    }

    // Declarative rules need exactly one match target.
    for rule in &config.scan.rules {
        if rule.header.is_some() == rule.body {
            anyhow::bail!(
                "rule {} must set exactly one of `header` or `body`",
                rule.symbol
            );
        }
    }

    // Fuzzy update networks must parse as CIDR.
    for net in &config.fuzzy.update_ips {
        parse_cidr(net).map_err(|e| anyhow::anyhow!("update_ips entry {net:?}: {e}"))?;
    }

    // Classifier statfile labels must be unique and non-empty per classifier.
    for cl in &config.stat.classifiers {
        if cl.statfiles.is_empty() {
            anyhow::bail!("classifier {} has no statfiles", cl.name);
        }
        let mut labels: Vec<&str> = cl.statfiles.iter().map(|s| s.label.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        if labels.len() != cl.statfiles.len() {
            anyhow::bail!("classifier {} has duplicate statfile labels", cl.name);
        }
        if !cl.statfiles.iter().any(|s| s.spam) || !cl.statfiles.iter().any(|s| !s.spam) {
            anyhow::bail!(
                "classifier {} needs at least one spam and one ham statfile",
                cl.name
            );
        }
    }

    Ok(())
}

fn validate_listen(listen: &str, scheme: &str) -> anyhow::Result<()> {
    let prefix = format!("{scheme}://");
    let addr = listen
        .strip_prefix(&prefix)
        .ok_or_else(|| anyhow::anyhow!("listen address {listen:?} must start with {prefix:?}"))?;
    addr.parse::<std::net::SocketAddr>()
        .map_err(|e| anyhow::anyhow!("listen address {listen:?}: {e}"))?;
    Ok(())
}

/// Parse `a.b.c.d/len` or `addr` (host route). Returns (addr, prefix_len).
pub fn parse_cidr(s: &str) -> anyhow::Result<(std::net::IpAddr, u8)> {
    let (addr_part, len_part) = match s.split_once('/') {
        Some((a, l)) => (a, Some(l)),
        None => (s, None),
    };
    let addr: std::net::IpAddr = addr_part
        .parse()
        .map_err(|e| anyhow::anyhow!("bad address: {e}"))?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    let len = match len_part {
        Some(l) => l.parse::<u8>().map_err(|e| anyhow::anyhow!("bad prefix: {e}"))?,
        None => max,
    };
    if len > max {
        anyhow::bail!("prefix length {len} exceeds {max}");
    }
    Ok((addr, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_forms() {
        assert!(parse_cidr("127.0.0.1/32").is_ok());
        assert!(parse_cidr("10.0.0.0/8").is_ok());
        assert!(parse_cidr("::1/128").is_ok());
        assert!(parse_cidr("192.168.0.1").is_ok());
        assert!(parse_cidr("10.0.0.0/33").is_err());
        assert!(parse_cidr("nonsense/8").is_err());
    }

    #[test]
    fn listen_scheme_enforced() {
        assert!(validate_listen("tcp://127.0.0.1:11333", "tcp").is_ok());
        assert!(validate_listen("udp://127.0.0.1:11335", "tcp").is_err());
        assert!(validate_listen("tcp://nowhere", "tcp").is_err());
    }
}
