use tracing::warn;

use crate::bundle_format::DeltaCommand;
use crate::error::{BundleError, Result};

#[derive(Debug)]
pub enum DeltaOutcome {
    Patched {
        lines: Vec<String>,
        /// Commands that were rejected; the file may be only partially patched.
        skipped: Vec<BundleError>,
    },
    DeleteFile,
}

/// Convert an original-file position to a working-array index.
fn working_index(position: usize, offset: isize) -> Option<usize> {
    let position = isize::try_from(position).ok()?;
    usize::try_from(position.checked_add(offset)?).ok()
}

/// Resolve the half-open working range covering original lines `[start, end]`.
/// `end == start - 1` yields an empty range positioned before `start`.
fn working_range(
    path: &str,
    start: usize,
    end: usize,
    offset: isize,
    len: usize,
) -> Result<(usize, usize)> {
    if start == 0 {
        return Err(BundleError::delta_range(path, "line numbers start at 1"));
    }
    if end < start - 1 {
        return Err(BundleError::delta_range(
            path,
            format!("inverted range {start}..{end}"),
        ));
    }
    let lo = working_index(start - 1, offset);
    let hi = working_index(end, offset);
    match (lo, hi) {
        (Some(lo), Some(hi)) if hi <= len => Ok((lo, hi)),
        _ => Err(BundleError::delta_range(
            path,
            format!("lines {start}..{end} are outside the file ({len} lines, offset {offset})"),
        )),
    }
}

/// Apply one command to the working lines.
///
/// Returns the new working lines and the new cumulative offset. `lines` is
/// left untouched when the command is rejected.
pub fn apply_command(
    path: &str,
    lines: &[String],
    offset: isize,
    command: &DeltaCommand,
) -> Result<(Vec<String>, isize)> {
    match command {
        DeltaCommand::Replace {
            start,
            end,
            lines: payload,
        } => {
            let (lo, hi) = working_range(path, *start, *end, offset, lines.len())?;
            let mut next = Vec::with_capacity(lines.len() - (hi - lo) + payload.len());
            next.extend_from_slice(&lines[..lo]);
            next.extend(payload.iter().cloned());
            next.extend_from_slice(&lines[hi..]);
            let delta = payload.len() as isize - (hi - lo) as isize;
            Ok((next, offset + delta))
        }
        DeltaCommand::InsertAfter {
            line,
            lines: payload,
        } => {
            let at = working_index(*line, offset)
                .filter(|at| *at <= lines.len())
                .ok_or_else(|| {
                    BundleError::delta_range(
                        path,
                        format!(
                            "cannot insert after line {line} ({} lines, offset {offset})",
                            lines.len()
                        ),
                    )
                })?;
            let mut next = Vec::with_capacity(lines.len() + payload.len());
            next.extend_from_slice(&lines[..at]);
            next.extend(payload.iter().cloned());
            next.extend_from_slice(&lines[at..]);
            Ok((next, offset + payload.len() as isize))
        }
        DeltaCommand::Delete { start, end } => {
            if end < start {
                return Err(BundleError::delta_range(
                    path,
                    format!("inverted range {start}..{end}"),
                ));
            }
            let (lo, hi) = working_range(path, *start, *end, offset, lines.len())?;
            let mut next = Vec::with_capacity(lines.len() - (hi - lo));
            next.extend_from_slice(&lines[..lo]);
            next.extend_from_slice(&lines[hi..]);
            Ok((next, offset - (hi - lo) as isize))
        }
        DeltaCommand::DeleteFile => Err(BundleError::delta_range(
            path,
            "DELETE_FILE() cannot be combined with line edits",
        )),
    }
}

/// Apply an ordered command list to the original lines of one file.
///
/// Every command addresses original line numbers; the running offset maps
/// them onto the working array. A rejected command is skipped with a warning
/// and leaves the offset unchanged.
pub fn apply_delta(path: &str, original: &[String], commands: &[DeltaCommand]) -> DeltaOutcome {
    if matches!(commands, [DeltaCommand::DeleteFile]) {
        return DeltaOutcome::DeleteFile;
    }

    let mut skipped = Vec::new();
    let (lines, _offset) = commands.iter().fold(
        (original.to_vec(), 0isize),
        |(lines, offset), command| match apply_command(path, &lines, offset, command) {
            Ok(next) => next,
            Err(e) => {
                warn!(path, command = %command, error = %e, "delta command skipped");
                skipped.push(e);
                (lines, offset)
            }
        },
    );

    DeltaOutcome::Patched { lines, skipped }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn patched(outcome: DeltaOutcome) -> (Vec<String>, usize) {
        match outcome {
            DeltaOutcome::Patched { lines, skipped } => (lines, skipped.len()),
            DeltaOutcome::DeleteFile => panic!("unexpected delete"),
        }
    }

    #[test]
    fn test_compound_edit_in_original_coordinates() {
        let original = lines(&[
            "line 1",
            "line 2 OLD",
            "line 3",
            "line 4 to be deleted",
            "line 5",
        ]);
        let commands = vec![
            DeltaCommand::InsertAfter {
                line: 1,
                lines: lines(&["line 1.5 INSERTED"]),
            },
            DeltaCommand::Replace {
                start: 2,
                end: 2,
                lines: lines(&["line 2 NEW"]),
            },
            DeltaCommand::Delete { start: 4, end: 4 },
        ];
        let (result, skipped) = patched(apply_delta("f.txt", &original, &commands));
        assert_eq!(skipped, 0);
        assert_eq!(
            result,
            lines(&[
                "line 1",
                "line 1.5 INSERTED",
                "line 2 NEW",
                "line 3",
                "line 5"
            ])
        );
    }

    #[test]
    fn test_each_step_reports_offset() {
        let original = lines(&["a", "b", "c"]);
        let insert = DeltaCommand::InsertAfter {
            line: 0,
            lines: lines(&["x", "y"]),
        };
        let (after_insert, offset) = apply_command("f", &original, 0, &insert).unwrap();
        assert_eq!(after_insert, lines(&["x", "y", "a", "b", "c"]));
        assert_eq!(offset, 2);

        let replace = DeltaCommand::Replace {
            start: 1,
            end: 2,
            lines: lines(&["ab"]),
        };
        let (after_replace, offset) = apply_command("f", &after_insert, offset, &replace).unwrap();
        assert_eq!(after_replace, lines(&["x", "y", "ab", "c"]));
        assert_eq!(offset, 1);

        let delete = DeltaCommand::Delete { start: 3, end: 3 };
        let (after_delete, offset) = apply_command("f", &after_replace, offset, &delete).unwrap();
        assert_eq!(after_delete, lines(&["x", "y", "ab"]));
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_replace_nothing_into_empty_file() {
        let commands = vec![DeltaCommand::Replace {
            start: 1,
            end: 0,
            lines: lines(&["first", "second"]),
        }];
        let (result, skipped) = patched(apply_delta("new.txt", &[], &commands));
        assert_eq!(skipped, 0);
        assert_eq!(result, lines(&["first", "second"]));
    }

    #[test]
    fn test_insert_at_end() {
        let original = lines(&["a", "b"]);
        let commands = vec![DeltaCommand::InsertAfter {
            line: 2,
            lines: lines(&["c"]),
        }];
        let (result, _) = patched(apply_delta("f", &original, &commands));
        assert_eq!(result, lines(&["a", "b", "c"]));
    }

    #[test]
    fn test_invalid_command_is_skipped_without_touching_offset() {
        let original = lines(&["a", "b", "c"]);
        let commands = vec![
            DeltaCommand::Delete { start: 1, end: 1 },
            DeltaCommand::Replace {
                start: 9,
                end: 10,
                lines: lines(&["nope"]),
            },
            DeltaCommand::Delete { start: 3, end: 2 },
            DeltaCommand::Replace {
                start: 3,
                end: 3,
                lines: lines(&["C"]),
            },
        ];
        let (result, skipped) = patched(apply_delta("f", &original, &commands));
        assert_eq!(skipped, 2);
        assert_eq!(result, lines(&["b", "C"]));
    }

    #[test]
    fn test_out_of_bounds_and_zero_line_rejected() {
        let original = lines(&["a"]);
        assert!(apply_command(
            "f",
            &original,
            0,
            &DeltaCommand::InsertAfter {
                line: 2,
                lines: vec![]
            }
        )
        .is_err());
        assert!(apply_command("f", &original, 0, &DeltaCommand::Delete { start: 0, end: 1 }).is_err());
        assert!(apply_command("f", &original, 0, &DeltaCommand::Delete { start: 1, end: 2 }).is_err());
        assert!(apply_command("f", &original, -5, &DeltaCommand::Delete { start: 1, end: 1 }).is_err());
    }

    #[test]
    fn test_delete_file_short_circuits() {
        let original = lines(&["a"]);
        assert!(matches!(
            apply_delta("f", &original, &[DeltaCommand::DeleteFile]),
            DeltaOutcome::DeleteFile
        ));
    }

    #[test]
    fn test_empty_command_list_keeps_original() {
        let original = lines(&["a", "b"]);
        let (result, skipped) = patched(apply_delta("f", &original, &[]));
        assert_eq!(result, original);
        assert_eq!(skipped, 0);
    }
}
