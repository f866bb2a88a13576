//! Boundary-aware text chunker.
//!
//! Splits an oversized node's text into ordered spans, each within
//! `[min_chars, max_chars]` and aimed at `target_chars`. Boundary
//! candidates are ranked: paragraph break, then sentence end, then word
//! break. A cut never lands inside a word or a UTF-8 sequence; the forced
//! cut exists only for a single unbroken token wider than the window.
//! Spans cover the input exactly — no gaps, no overlaps — so a parent's
//! text can always be reconstructed from its children.

use crate::models::Span;

/// Chunk sizing, in characters. All limits are explicit configuration;
/// the defaults suit conversational archive text.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPolicy {
    pub max_chars: usize,
    pub min_chars: usize,
    pub target_chars: usize,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            max_chars: 2000,
            min_chars: 200,
            target_chars: 1500,
        }
    }
}

/// Candidate cut point: boundary class, byte offset, chars to its left.
#[derive(Debug, Clone, Copy)]
struct Cut {
    priority: u8,
    bytes: usize,
    chars: usize,
}

/// Split `text` into ordered byte spans. Text at or under `max_chars`
/// yields a single span over the whole input.
pub fn split(text: &str, policy: &ChunkPolicy) -> Vec<Span> {
    let total_chars = text.chars().count();
    if total_chars <= policy.max_chars {
        return vec![Span {
            start: 0,
            end: text.len(),
        }];
    }

    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut remaining = total_chars;

    while remaining > policy.max_chars {
        let cut = find_cut(&text[start..], policy);
        spans.push(Span {
            start,
            end: start + cut.bytes,
        });
        start += cut.bytes;
        remaining -= cut.chars;
    }
    spans.push(Span {
        start,
        end: text.len(),
    });

    // An undersized tail folds into the previous span when it still fits.
    if spans.len() >= 2 {
        let tail = spans[spans.len() - 1];
        let tail_chars = text[tail.start..tail.end].chars().count();
        if tail_chars < policy.min_chars {
            let prev = spans[spans.len() - 2];
            let prev_chars = text[prev.start..prev.end].chars().count();
            if prev_chars + tail_chars <= policy.max_chars {
                spans.pop();
                if let Some(last) = spans.last_mut() {
                    last.end = tail.end;
                }
            }
        }
    }

    spans
}

/// Scan up to `max_chars` characters and pick the best cut: highest
/// boundary class first, then the candidate closest to `target_chars`
/// (later position wins ties). Falls back to a forced cut at exactly
/// `max_chars` characters when no boundary exists in range.
fn find_cut(text: &str, policy: &ChunkPolicy) -> Cut {
    let mut best: Option<Cut> = None;
    let mut chars_seen = 0usize;
    let mut prev: Option<char> = None;
    // State of the whitespace run preceding the current char.
    let mut run_newlines = 0usize;
    let mut before_run: Option<char> = None;
    let mut forced_bytes = text.len();

    for (i, ch) in text.char_indices() {
        if let Some(p) = prev {
            if p.is_whitespace() && !ch.is_whitespace() && chars_seen >= policy.min_chars {
                let priority = if run_newlines >= 2 {
                    2
                } else if matches!(before_run, Some('.') | Some('!') | Some('?')) {
                    1
                } else {
                    0
                };
                let candidate = Cut {
                    priority,
                    bytes: i,
                    chars: chars_seen,
                };
                best = Some(match best {
                    None => candidate,
                    Some(b) if candidate.priority > b.priority => candidate,
                    Some(b) if candidate.priority < b.priority => b,
                    Some(b) => {
                        let db = b.chars.abs_diff(policy.target_chars);
                        let dc = candidate.chars.abs_diff(policy.target_chars);
                        if dc <= db {
                            candidate
                        } else {
                            b
                        }
                    }
                });
            }
        }

        if chars_seen == policy.max_chars {
            forced_bytes = i;
            break;
        }

        if ch.is_whitespace() {
            if prev.map_or(true, |p| !p.is_whitespace()) {
                before_run = prev;
                run_newlines = 0;
            }
            if ch == '\n' {
                run_newlines += 1;
            }
        }
        prev = Some(ch);
        chars_seen += 1;
    }

    best.unwrap_or(Cut {
        priority: 0,
        bytes: forced_bytes,
        chars: policy.max_chars,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max: usize, min: usize, target: usize) -> ChunkPolicy {
        ChunkPolicy {
            max_chars: max,
            min_chars: min,
            target_chars: target,
        }
    }

    fn assert_coverage(text: &str, spans: &[Span]) {
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans[spans.len() - 1].end, text.len());
        for w in spans.windows(2) {
            assert_eq!(w[0].end, w[1].start, "gap or overlap between spans");
        }
    }

    #[test]
    fn small_text_single_span() {
        let spans = split("Hello, world!", &ChunkPolicy::default());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0], Span { start: 0, end: 13 });
    }

    #[test]
    fn paragraphs_cut_on_paragraph_breaks() {
        let text = format!(
            "{}\n\n{}\n\n{}",
            "alpha ".repeat(20).trim(),
            "bravo ".repeat(20).trim(),
            "charlie ".repeat(15).trim()
        );
        let spans = split(&text, &policy(150, 40, 120));
        assert!(spans.len() > 1);
        assert_coverage(&text, &spans);
        // Every non-final span should end right after a paragraph break.
        for span in &spans[..spans.len() - 1] {
            assert!(
                text[span.start..span.end].ends_with("\n\n"),
                "span did not end at a paragraph break: {:?}",
                &text[span.start..span.end]
            );
        }
    }

    #[test]
    fn sentences_cut_when_no_paragraphs() {
        let text = "One sentence here. Another sentence follows. ".repeat(12);
        let spans = split(text.trim_end(), &policy(120, 30, 100));
        assert!(spans.len() > 1);
        assert_coverage(text.trim_end(), &spans);
        for span in &spans[..spans.len() - 1] {
            let piece = &text[span.start..span.end];
            assert!(
                piece.trim_end().ends_with('.'),
                "span did not end at a sentence: {:?}",
                piece
            );
        }
    }

    #[test]
    fn never_splits_inside_a_word() {
        let text = "word ".repeat(200);
        let text = text.trim_end();
        let spans = split(text, &policy(100, 20, 80));
        assert_coverage(text, &spans);
        for span in &spans[1..] {
            let before = text[..span.start].chars().last().unwrap();
            assert!(before.is_whitespace(), "cut landed inside a word");
        }
    }

    #[test]
    fn unbroken_token_forces_cut_at_max() {
        let text = "a".repeat(450);
        let spans = split(&text, &policy(100, 20, 80));
        assert_coverage(&text, &spans);
        for span in &spans[..spans.len() - 1] {
            assert_eq!(span.len(), 100);
        }
    }

    #[test]
    fn spans_respect_bounds() {
        let text = "lorem ipsum dolor sit amet consectetur adipiscing elit ".repeat(40);
        let text = text.trim_end();
        let p = policy(200, 50, 150);
        let spans = split(text, &p);
        assert_coverage(text, &spans);
        for span in &spans {
            let chars = text[span.start..span.end].chars().count();
            assert!(chars <= p.max_chars, "span over max: {}", chars);
        }
        for span in &spans[..spans.len() - 1] {
            let chars = text[span.start..span.end].chars().count();
            assert!(chars >= p.min_chars, "non-final span under min: {}", chars);
        }
    }

    #[test]
    fn multibyte_text_cuts_on_char_boundaries() {
        let text = "απλό κείμενο με ελληνικούς χαρακτήρες ".repeat(30);
        let text = text.trim_end();
        let spans = split(text, &policy(120, 30, 100));
        assert_coverage(text, &spans);
        for span in &spans {
            // Slicing panics on a non-char boundary, so this is the assertion.
            let _ = &text[span.start..span.end];
        }
    }

    #[test]
    fn deterministic() {
        let text = "Some sentence. Another one! A third?\n\nNew paragraph with more words. ".repeat(15);
        let a = split(&text, &policy(180, 40, 140));
        let b = split(&text, &policy(180, 40, 140));
        assert_eq!(a, b);
    }
}
