use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat};
use tracestash_core::model::{DependencyLink, Span, Trace};

pub fn print_names_human(names: &[String]) {
    for name in names {
        println!("{name}");
    }
    println!("-- {} names --", names.len());
}

pub fn print_traces_human(traces: &[Trace]) {
    for trace in traces {
        let Some(first) = trace.first() else {
            continue;
        };
        let root = root_of(trace).unwrap_or(first);
        println!(
            "trace={} start={} duration={} spans={} errors={} root=\"{} {}\"",
            first.trace_id(),
            format_micros(trace.iter().filter_map(Span::timestamp).min()),
            format_duration(trace_duration(trace)),
            trace.len(),
            error_count(trace),
            root.local_service_name().unwrap_or("-"),
            root.name().unwrap_or("-"),
        );
    }
    println!("-- {} traces --", traces.len());
}

pub fn print_trace_human(trace: &Trace) {
    let Some(first) = trace.first() else {
        return;
    };
    println!(
        "TRACE {} duration={} spans={} errors={}",
        first.trace_id(),
        format_duration(trace_duration(trace)),
        trace.len(),
        error_count(trace)
    );
    print_span_tree(trace);
}

pub fn print_dependencies_human(links: &[DependencyLink]) {
    for link in links {
        println!(
            "{} -> {} calls={} errors={}",
            link.parent, link.child, link.call_count, link.error_count
        );
    }
    println!("-- {} links --", links.len());
}

fn root_of(trace: &Trace) -> Option<&Span> {
    trace.iter().find(|s| s.parent_id().is_none())
}

fn error_count(trace: &Trace) -> usize {
    trace
        .iter()
        .filter(|s| s.tags().contains_key("error"))
        .count()
}

/// Earliest start to latest end, in microseconds.
fn trace_duration(trace: &Trace) -> Option<u64> {
    let start = trace.iter().filter_map(Span::timestamp).min()?;
    let end = trace
        .iter()
        .filter_map(|s| Some(s.timestamp()? + s.duration().unwrap_or(0)))
        .max()?;
    Some(end.saturating_sub(start))
}

fn format_duration(micros: Option<u64>) -> String {
    match micros {
        Some(us) if us >= 1_000 => format!("{:.3}ms", us as f64 / 1_000.0),
        Some(us) => format!("{us}us"),
        None => "-".to_string(),
    }
}

fn format_micros(micros: Option<u64>) -> String {
    micros
        .and_then(|us| i64::try_from(us).ok())
        .and_then(DateTime::from_timestamp_micros)
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| "-".to_string())
}

fn print_span_tree(spans: &[Span]) {
    let mut children: HashMap<Option<&str>, Vec<&Span>> = HashMap::new();
    for span in spans {
        children.entry(span.parent_id()).or_default().push(span);
    }
    // Spans whose parent is missing from the result are shown as roots.
    let known: Vec<&str> = spans.iter().map(Span::id).collect();
    for span in spans {
        let orphan = span.parent_id().is_some_and(|p| !known.contains(&p));
        if span.parent_id().is_none() || orphan {
            print_node(span, &children, 0);
        }
    }
}

fn print_node(span: &Span, children: &HashMap<Option<&str>, Vec<&Span>>, depth: usize) {
    let indent = "  ".repeat(depth);
    let kind = span
        .kind()
        .map(|k| format!(" [{k:?}]").to_lowercase())
        .unwrap_or_default();
    let remote = span
        .remote_service_name()
        .map(|r| format!(" -> {r}"))
        .unwrap_or_default();
    println!(
        "{}{} {}{}{} ({})",
        indent,
        span.local_service_name().unwrap_or("-"),
        span.name().unwrap_or("-"),
        kind,
        remote,
        format_duration(span.duration()),
    );

    if let Some(kids) = children.get(&Some(span.id())) {
        for child in kids {
            print_node(child, children, depth + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(id: &str, parent: Option<&str>, ts: u64, duration: u64) -> Span {
        let mut b = Span::builder();
        b.trace_id("1").id(id).timestamp(ts).duration(duration);
        if let Some(p) = parent {
            b.parent_id(p);
        }
        b.build().unwrap()
    }

    #[test]
    fn trace_duration_spans_earliest_start_to_latest_end() {
        let trace = vec![span("1", None, 100, 50), span("2", Some("1"), 120, 200)];
        assert_eq!(trace_duration(&trace), Some(220));
        assert_eq!(format_duration(Some(220)), "220us");
        assert_eq!(format_duration(Some(1_500)), "1.500ms");
    }

    #[test]
    fn timestamps_render_as_rfc3339() {
        assert_eq!(
            format_micros(Some(1_700_000_000_123_000)),
            "2023-11-14T22:13:20.123Z"
        );
        assert_eq!(format_micros(None), "-");
    }
}
