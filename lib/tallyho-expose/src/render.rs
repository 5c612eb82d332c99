use std::fmt::Write as _;

use tallyho_aggregate::{FamilySnapshot, MetricKind, Registry, ValueSnapshot};
use tallyho_context::tags::TagSet;
use tracing::debug;

/// Content type of payloads produced by [`render_registry`].
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

const PAYLOAD_BUFFER_CAPACITY: usize = 128 * 1024;
const TAGS_BUFFER_CAPACITY: usize = 2048;

/// Renders every family in the registry to the Prometheus text exposition format.
///
/// Families are rendered in name order, and series within a family in canonical tag order, so two
/// renders of the same registry state produce identical payloads. Families with no series yet are
/// omitted entirely.
pub fn render_registry(registry: &Registry) -> String {
    let mut payload = String::with_capacity(PAYLOAD_BUFFER_CAPACITY);
    let mut tags_buffer = String::with_capacity(TAGS_BUFFER_CAPACITY);

    let mut families_written = 0;
    for family in registry.snapshot() {
        if family.series().is_empty() {
            debug!("No series for metric '{}'. Skipping.", family.name());
            continue;
        }

        // If we've already written some families, add a newline between each grouping.
        if families_written > 0 {
            payload.push('\n');
        }

        write_family(&mut payload, &mut tags_buffer, &family);
        families_written += 1;
    }

    payload
}

fn write_family(payload: &mut String, tags_buffer: &mut String, family: &FamilySnapshot) {
    let name = family.name();

    // Write HELP if available, and the metric header.
    if !family.help().is_empty() {
        write!(payload, "# HELP {} ", name).unwrap();
        escape_help_text(payload, family.help());
        payload.push('\n');
    }
    writeln!(payload, "# TYPE {} {}", name, prometheus_type(family.kind())).unwrap();

    for series in family.series() {
        tags_buffer.clear();
        format_tags(tags_buffer, series.tags());

        match series.value() {
            ValueSnapshot::Counter(value) | ValueSnapshot::Gauge(value) => {
                // No metric type-specific tags for counters or gauges, so just write them straight out.
                payload.push_str(name);
                if !tags_buffer.is_empty() {
                    payload.push('{');
                    payload.push_str(tags_buffer);
                    payload.push('}');
                }
                writeln!(payload, " {}", value).unwrap();
            }
            ValueSnapshot::Histogram(histogram) => {
                // Write the histogram buckets.
                for (upper_bound, count) in histogram.buckets() {
                    write!(payload, "{}_bucket{{{}", name, tags_buffer).unwrap();
                    if !tags_buffer.is_empty() {
                        payload.push(',');
                    }
                    writeln!(payload, "le=\"{}\"}} {}", upper_bound, count).unwrap();
                }

                // Write the final bucket -- the +Inf bucket -- which is just equal to the count of
                // the histogram.
                write!(payload, "{}_bucket{{{}", name, tags_buffer).unwrap();
                if !tags_buffer.is_empty() {
                    payload.push(',');
                }
                writeln!(payload, "le=\"+Inf\"}} {}", histogram.count()).unwrap();

                // Write the histogram sum and count.
                write!(payload, "{}_sum", name).unwrap();
                if !tags_buffer.is_empty() {
                    payload.push('{');
                    payload.push_str(tags_buffer);
                    payload.push('}');
                }
                writeln!(payload, " {}", histogram.sum()).unwrap();

                write!(payload, "{}_count", name).unwrap();
                if !tags_buffer.is_empty() {
                    payload.push('{');
                    payload.push_str(tags_buffer);
                    payload.push('}');
                }
                writeln!(payload, " {}", histogram.count()).unwrap();
            }
        }
    }
}

fn format_tags(tags_buffer: &mut String, tags: &TagSet) {
    let mut has_tags = false;

    for tag in tags {
        let tag_name = tag.name();
        let tag_value = match tag.value() {
            Some(value) => value,
            None => {
                debug!("Skipping bare tag.");
                continue;
            }
        };

        // If we're not the first tag to be written, add a comma to separate the tags.
        if has_tags {
            tags_buffer.push(',');
        }
        has_tags = true;

        write_label_name(tags_buffer, tag_name);
        tags_buffer.push_str("=\"");
        escape_label_value(tags_buffer, tag_value);
        tags_buffer.push('"');
    }
}

fn write_label_name(tags_buffer: &mut String, name: &str) {
    // Normalize the tag name to a valid Prometheus label name.
    for (i, c) in name.chars().enumerate() {
        if i == 0 && is_valid_label_start_char(c) || i != 0 && is_valid_label_char(c) {
            tags_buffer.push(c);
        } else {
            // Convert periods to a set of two underscores, and anything else to a single underscore.
            //
            // This lets us ensure that the normal separators we use in tag names (periods) are
            // converted in a way where they can be distinguished on the collector side to
            // potentially reconstitute them back to their original form.
            tags_buffer.push_str(if c == '.' { "__" } else { "_" });
        }
    }
}

fn escape_label_value(tags_buffer: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => tags_buffer.push_str("\\\\"),
            '"' => tags_buffer.push_str("\\\""),
            '\n' => tags_buffer.push_str("\\n"),
            _ => tags_buffer.push(c),
        }
    }
}

fn escape_help_text(payload: &mut String, help: &str) {
    for c in help.chars() {
        match c {
            '\\' => payload.push_str("\\\\"),
            '\n' => payload.push_str("\\n"),
            _ => payload.push(c),
        }
    }
}

fn prometheus_type(kind: MetricKind) -> &'static str {
    match kind {
        MetricKind::Counter => "counter",
        // A non-monotonic sum is a gauge in Prometheus terms.
        MetricKind::UpDownCounter | MetricKind::Gauge => "gauge",
        MetricKind::Histogram => "histogram",
    }
}

#[inline]
fn is_valid_label_start_char(c: char) -> bool {
    // Matches a regular expression of [a-zA-Z_].
    c.is_ascii_alphabetic() || c == '_'
}

#[inline]
fn is_valid_label_char(c: char) -> bool {
    // Matches a regular expression of [a-zA-Z0-9_].
    c.is_ascii_alphanumeric() || c == '_'
}
