use chrono::{Datelike, NaiveDate, NaiveTime, TimeDelta};

use crate::model::*;

// ── Weekly availability ───────────────────────────────────────────

/// True if every instant of `span` falls inside an opening window of the
/// weekday it lies on.
///
/// The span is cut at local midnights; each same-day segment must be fully
/// contained in one merged window of that day. Windows of one weekday that
/// touch or overlap act as a single window.
pub fn is_within_availability(windows: &[AvailabilityWindow], span: &Span) -> bool {
    if span.start >= span.end {
        return false;
    }
    day_segments(span).iter().all(|segment| {
        windows_on(windows, segment.start.date())
            .iter()
            .any(|open| open.contains_span(segment))
    })
}

/// Split a span at local midnights into same-day segments.
pub fn day_segments(span: &Span) -> Vec<Span> {
    let mut segments = Vec::new();
    let mut start = span.start;
    while start < span.end {
        let end = match start.date().succ_opt() {
            Some(next) => next.and_time(NaiveTime::MIN).min(span.end),
            None => span.end,
        };
        segments.push(Span::new(start, end));
        start = end;
    }
    segments
}

/// The windows of `date`'s weekday placed on that date, sorted and merged.
pub fn windows_on(windows: &[AvailabilityWindow], date: NaiveDate) -> Vec<Span> {
    let midnight = date.and_time(NaiveTime::MIN);
    let weekday = date.weekday();
    let mut spans: Vec<Span> = windows
        .iter()
        .filter(|w| w.weekday == weekday && w.is_valid())
        .map(|w| Span::new(midnight + w.opens_offset(), midnight + w.closes_offset()))
        .collect();
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// Free time inside `query`: the weekly windows laid out over every day the
/// query touches, minus `booked` (sorted by start, non-overlapping).
pub fn open_slots(windows: &[AvailabilityWindow], booked: &[Span], query: &Span) -> Vec<Span> {
    let mut open = Vec::new();
    let mut date = query.start.date();
    while date.and_time(NaiveTime::MIN) < query.end {
        for span in windows_on(windows, date) {
            let start = span.start.max(query.start);
            let end = span.end.min(query.end);
            if start < end {
                open.push(Span::new(start, end));
            }
        }
        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    // Windows ending at midnight join the next day's early windows.
    let open = merge_overlapping(&open);
    if booked.is_empty() {
        return open;
    }
    subtract_intervals(&open, booked)
}

// ── Interval helpers ──────────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
