//! File replay generator.
//!
//! Plays back a recorded motion, one record per send tick. Record format, one
//! per line, `;`-separated:
//!
//! ```text
//! J;j0;j1;j2;j3;j4;j5;e0;e1;e2;x;y;z;a;b;c
//! C;j0;j1;j2;j3;j4;j5;e0;e1;e2;x;y;z;a;b;c
//! ```
//!
//! `J` records replace the joints of the current pose, `C` records replace
//! the cartesian pose and the external axes. Decimals may use `.` or `,`.

use super::PositionSource;
use crate::error::ReplayError;
use cri_common::consts::{JOINT_COUNT, ROBOT_JOINT_COUNT};
use cri_common::position::PositionSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Numeric fields following the record type.
const RECORD_FIELDS: usize = JOINT_COUNT + 6;

/// Parse one record line. `line_no` is 1-based and only used for errors.
///
/// Missing trailing fields read as zero.
fn parse_record(line: &str, line_no: usize) -> Result<PositionSet, ReplayError> {
    let mut fields = line.split(';');
    let kind = fields.next().unwrap_or("").trim();

    let mut values = [0.0f64; RECORD_FIELDS];
    for (slot, field) in values.iter_mut().zip(fields) {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        *slot = field
            .replace(',', ".")
            .parse()
            .map_err(|_| ReplayError::InvalidNumber {
                line: line_no,
                field: field.to_string(),
            })?;
    }

    let mut record = PositionSet::default();
    record.joints.copy_from_slice(&values[..JOINT_COUNT]);
    record
        .cartesian_position
        .copy_from_slice(&values[JOINT_COUNT..JOINT_COUNT + 3]);
    record
        .cartesian_orientation
        .copy_from_slice(&values[JOINT_COUNT + 3..]);
    record.is_cartesian = kind.eq_ignore_ascii_case("C");
    Ok(record)
}

/// Read a whole replay file. Blank lines are skipped.
pub fn read_replay_file(path: &Path) -> Result<Vec<PositionSet>, ReplayError> {
    let text = fs::read_to_string(path).map_err(|source| ReplayError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| parse_record(line, idx + 1))
        .collect()
}

/// Overlay a record onto the current pose.
fn merge(current: &PositionSet, record: &PositionSet) -> PositionSet {
    let mut merged = *current;
    if record.is_cartesian {
        merged.cartesian_position = record.cartesian_position;
        merged.cartesian_orientation = record.cartesian_orientation;
        merged.joints[ROBOT_JOINT_COUNT..].copy_from_slice(&record.joints[ROBOT_JOINT_COUNT..]);
    } else {
        merged.joints = record.joints;
    }
    merged.is_cartesian = record.is_cartesian;
    merged
}

/// File replay generator.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    path: Option<PathBuf>,
    records: Vec<PositionSet>,
    index: usize,
    running: bool,
    repeat: bool,
}

impl ReplaySource {
    /// Create a stopped generator for `path`. The file is read on first start.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Change the file. Drops the cached records and stops playback.
    pub fn set_file(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
        self.records.clear();
        self.index = 0;
        self.running = false;
    }

    /// File being replayed.
    pub fn file(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Wrap to the first record at the end instead of stopping.
    pub fn set_repeat(&mut self, repeat: bool) {
        self.repeat = repeat;
    }

    /// Start playback from the first record, reading the file if needed.
    /// Does nothing while already playing.
    ///
    /// A file that cannot be read leaves the generator with no records; it
    /// then stops on its first tick.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        if self.records.is_empty() {
            self.load();
        }
        self.index = 0;
        self.running = true;
        info!("Replay: started ({} records)", self.records.len());
    }

    /// Stop playback.
    pub fn stop(&mut self) {
        if self.running {
            info!("Replay: stopped at record {}", self.index);
        }
        self.running = false;
    }

    /// True while playing.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no records are cached.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Index of the next record.
    pub fn index(&self) -> usize {
        self.index
    }

    fn load(&mut self) {
        self.records.clear();
        let Some(path) = self.path.as_deref() else {
            error!("Replay: no file set");
            return;
        };
        match read_replay_file(path) {
            Ok(records) => {
                debug!("Replay: read {} records from {}", records.len(), path.display());
                self.records = records;
            }
            Err(e) => error!("Replay: {}", e),
        }
    }
}

impl PositionSource for ReplaySource {
    fn next_position(&mut self, current: &PositionSet, _elapsed_ms: f64) -> PositionSet {
        if !self.running {
            return *current;
        }
        if self.index >= self.records.len() {
            if self.repeat && !self.records.is_empty() {
                self.index = 0;
            } else {
                self.stop();
                return *current;
            }
        }

        let record = self.records[self.index];
        self.index += 1;
        merge(current, &record)
    }

    fn name(&self) -> &'static str {
        "replay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cri_common::consts::EXTERNAL_JOINT_COUNT;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn replay_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn current_pose() -> PositionSet {
        let mut current = PositionSet::default();
        current.joints[..ROBOT_JOINT_COUNT].fill(1.0);
        current
    }

    #[test]
    fn test_two_line_file_without_repeat() {
        let file = replay_file(
            "J;0;0;0;0;0;0;0;0;0;0;0;0;0;0;0\nC;0;0;0;0;0;0;0;0;0;5;0;0;0;0;0\n",
        );
        let mut replay = ReplaySource::new(file.path());
        replay.start();
        assert_eq!(replay.len(), 2);

        let current = current_pose();
        let first = replay.next_position(&current, 10.0);
        assert!(!first.is_cartesian);
        assert_eq!(first.joints, [0.0; JOINT_COUNT]);

        let second = replay.next_position(&current, 10.0);
        assert!(second.is_cartesian);
        assert_eq!(second.cartesian_position[0], 5.0);
        assert_eq!(second.joints[..ROBOT_JOINT_COUNT], current.joints[..ROBOT_JOINT_COUNT]);
        assert_eq!(second.joints[ROBOT_JOINT_COUNT..], [0.0; EXTERNAL_JOINT_COUNT]);

        let third = replay.next_position(&current, 10.0);
        assert_eq!(third, current);
        assert!(!replay.is_running());
    }

    #[test]
    fn test_repeat_wraps_to_first_record() {
        let file = replay_file("j;1;0;0;0;0;0;0;0;0;0;0;0;0;0;0\nj;2;0;0;0;0;0;0;0;0;0;0;0;0;0;0\n");
        let mut replay = ReplaySource::new(file.path());
        replay.set_repeat(true);
        replay.start();

        let current = PositionSet::default();
        let values: Vec<f64> = (0..5)
            .map(|_| replay.next_position(&current, 10.0).joints[0])
            .collect();
        assert_eq!(values, vec![1.0, 2.0, 1.0, 2.0, 1.0]);
        assert!(replay.is_running());
    }

    #[test]
    fn test_start_while_playing_keeps_position() {
        let file = replay_file("J;1\nJ;2\nJ;3\n");
        let mut replay = ReplaySource::new(file.path());
        replay.start();

        let current = PositionSet::default();
        replay.next_position(&current, 10.0);
        replay.start();
        assert_eq!(replay.index(), 1);
        assert_eq!(replay.next_position(&current, 10.0).joints[0], 2.0);
    }

    #[test]
    fn test_comma_decimals_and_missing_fields() {
        let file = replay_file("C;0;0;0;0;0;0;1,5;2.25;0;10,5;-3\n");
        let records = read_replay_file(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        let record = records[0];
        assert!(record.is_cartesian);
        assert_eq!(record.joints[6], 1.5);
        assert_eq!(record.joints[7], 2.25);
        assert_eq!(record.cartesian_position, [10.5, -3.0, 0.0]);
        assert_eq!(record.cartesian_orientation, [0.0; 3]);
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let file = replay_file("\nJ;1\n   \nJ;2\n");
        let records = read_replay_file(file.path()).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_bad_number_clears_sequence() {
        let file = replay_file("J;1\nJ;abc\n");
        let err = read_replay_file(file.path()).unwrap_err();
        assert!(matches!(err, ReplayError::InvalidNumber { line: 2, .. }));

        let mut replay = ReplaySource::new(file.path());
        replay.start();
        assert!(replay.is_empty());

        let current = current_pose();
        assert_eq!(replay.next_position(&current, 10.0), current);
        assert!(!replay.is_running());
    }

    #[test]
    fn test_missing_file_does_not_panic() {
        let mut replay = ReplaySource::new("/nonexistent/replay.csv");
        replay.start();
        assert!(replay.is_empty());
    }

    #[test]
    fn test_set_file_forces_reread() {
        let first = replay_file("J;1\n");
        let second = replay_file("J;7\nJ;8\n");
        let mut replay = ReplaySource::new(first.path());
        replay.start();
        assert_eq!(replay.len(), 1);

        replay.set_file(second.path());
        assert!(!replay.is_running());
        assert!(replay.is_empty());
        replay.start();
        assert_eq!(replay.len(), 2);
        assert_eq!(replay.next_position(&PositionSet::default(), 1.0).joints[0], 7.0);
    }
}
