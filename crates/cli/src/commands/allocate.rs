//! `ragstream allocate`: split a retrieval budget across weighted sources.

use ragstream_config::ClientConfig;
use ragstream_core::{Allocator, Binding, prepare_bindings};

/// Parse `SOURCE:WEIGHT[:PRIORITY]`.
pub fn parse_binding(s: &str) -> Result<Binding, String> {
    let mut parts = s.split(':');
    let source_id = parts.next().unwrap_or_default().trim();
    if source_id.is_empty() {
        return Err(format!("'{s}': missing source id"));
    }
    let weight = match parts.next() {
        Some(w) => w
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("'{s}': bad weight: {e}"))?,
        None => 1.0,
    };
    let priority = match parts.next() {
        Some(p) => p
            .trim()
            .parse::<i64>()
            .map_err(|e| format!("'{s}': bad priority: {e}"))?,
        None => 0,
    };
    if parts.next().is_some() {
        return Err(format!("'{s}': expected SOURCE:WEIGHT[:PRIORITY]"));
    }
    Ok(Binding::new(source_id, weight, priority))
}

pub async fn run(
    budget: Option<u32>,
    strict: bool,
    bindings: Vec<Binding>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let budget = budget.unwrap_or(config.allocation.top_k);
    let allocator = Allocator::new(strict || config.allocation.strict);

    let bindings = if bindings.is_empty() {
        prepare_bindings(
            &config.allocation.enabled_bindings(),
            &config.allocation.fallback_source,
        )
    } else {
        bindings
    };

    let allocations = allocator.allocate(&bindings, budget)?;

    println!();
    println!("  Budget: {budget}  ({} sources)", allocations.len());
    println!();
    println!("  {:<24} {:>8} {:>8} {:>6}", "SOURCE", "WEIGHT", "PRIORITY", "QUOTA");
    for a in &allocations {
        println!(
            "  {:<24} {:>8.2} {:>8} {:>6}",
            a.source_id, a.weight, a.priority, a.quota
        );
    }
    let total: u32 = allocations.iter().map(|a| a.quota).sum();
    println!("  {:<24} {:>8} {:>8} {:>6}", "", "", "total", total);
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_binding() {
        let b = parse_binding("handbook:2.5:1").unwrap();
        assert_eq!(b, Binding::new("handbook", 2.5, 1));
    }

    #[test]
    fn parse_defaults() {
        assert_eq!(parse_binding("wiki").unwrap(), Binding::new("wiki", 1.0, 0));
        assert_eq!(parse_binding("wiki:3").unwrap(), Binding::new("wiki", 3.0, 0));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_binding(":1").is_err());
        assert!(parse_binding("a:heavy").is_err());
        assert!(parse_binding("a:1:first").is_err());
        assert!(parse_binding("a:1:2:3").is_err());
    }
}
