//! CrossLineTracker - Line Crossing Detection
//!
//! ## Responsibilities
//!
//! - Hold the registered line segments (identified by insertion index)
//! - Remember each track's last centre point
//! - Report sign changes of the cross-product side test as crossings
//!
//! A point exactly on a line (`side == 0`) never counts as being on either
//! side, so a transition onto or off a line produces no event.

use crate::annotate::{self, LINE_COLORS};
use crate::models::{Frame, Point, TrackId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One directed segment `a -> b`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossLine {
    pub a: Point,
    pub b: Point,
}

impl CrossLine {
    pub fn new(a: Point, b: Point) -> Self {
        Self { a, b }
    }

    /// Signed side of `p`: positive on one side, negative on the other, zero on the line
    pub fn side(&self, p: Point) -> i64 {
        let (ax, ay) = (self.a.x as i64, self.a.y as i64);
        let (bx, by) = (self.b.x as i64, self.b.y as i64);
        (bx - ax) * (p.y as i64 - ay) - (by - ay) * (p.x as i64 - ax)
    }

    /// True when both endpoints lie within `[0, width] x [0, height]`
    pub fn fits(&self, width: i32, height: i32) -> bool {
        [self.a, self.b]
            .iter()
            .all(|p| (0..=width).contains(&p.x) && (0..=height).contains(&p.y))
    }
}

/// Which way a track went through a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CrossDirection {
    /// From the negative side to the positive side
    AToB,
    /// From the positive side to the negative side
    BToA,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossingEvent {
    pub line_index: usize,
    pub direction: CrossDirection,
}

/// Geometry over registered lines and per-track position history
#[derive(Debug, Default)]
pub struct CrossLineTracker {
    lines: Vec<CrossLine>,
    history: HashMap<TrackId, Point>,
}

impl CrossLineTracker {
    /// Create new CrossLineTracker
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[CrossLine] {
        &self.lines
    }

    pub fn add_line(&mut self, a: Point, b: Point) {
        self.lines.push(CrossLine::new(a, b));
        tracing::debug!(line_index = self.lines.len() - 1, "Cross line added");
    }

    /// Replace all lines (an empty list clears them)
    pub fn set_lines(&mut self, lines: Vec<CrossLine>) {
        tracing::info!(count = lines.len(), "Cross lines replaced");
        self.lines = lines;
    }

    pub fn clear_lines(&mut self) {
        self.lines.clear();
    }

    /// True when the track crossed any line since its previous evaluation
    pub fn is_cross_line(&mut self, center: Point, track_id: TrackId) -> bool {
        !self.evaluate(center, track_id).is_empty()
    }

    /// Per-line crossing events since the previous evaluation of this track
    ///
    /// The first sighting of a track only records a baseline. History is
    /// overwritten with `center` after every call.
    pub fn evaluate(&mut self, center: Point, track_id: TrackId) -> Vec<CrossingEvent> {
        let Some(prev) = self.history.insert(track_id, center) else {
            return Vec::new();
        };

        self.lines
            .iter()
            .enumerate()
            .filter_map(|(line_index, line)| {
                let before = line.side(prev);
                let after = line.side(center);
                if before.signum() * after.signum() >= 0 {
                    return None;
                }
                let direction = if before < 0 {
                    CrossDirection::AToB
                } else {
                    CrossDirection::BToA
                };
                tracing::debug!(
                    track_id,
                    line_index,
                    direction = ?direction,
                    "Line crossed"
                );
                Some(CrossingEvent {
                    line_index,
                    direction,
                })
            })
            .collect()
    }

    pub fn last_position(&self, track_id: TrackId) -> Option<Point> {
        self.history.get(&track_id).copied()
    }

    /// Forget a track's last position
    pub fn forget(&mut self, track_id: TrackId) {
        self.history.remove(&track_id);
    }

    /// Draw every line in its index colour
    pub fn draw(&self, frame: &mut Frame) {
        for (i, line) in self.lines.iter().enumerate() {
            annotate::draw_segment(frame, line.a, line.b, LINE_COLORS[i % LINE_COLORS.len()]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn horizontal() -> CrossLineTracker {
        let mut t = CrossLineTracker::new();
        t.add_line(Point::new(0, 0), Point::new(10, 0));
        t
    }

    #[test]
    fn test_crossing_downward() {
        let mut t = horizontal();
        assert!(!t.is_cross_line(Point::new(5, -1), 1));

        let events = t.evaluate(Point::new(5, 1), 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].line_index, 0);
        assert_eq!(events[0].direction, CrossDirection::AToB);
    }

    #[test]
    fn test_crossing_back_is_b_to_a() {
        let mut t = horizontal();
        t.evaluate(Point::new(5, 1), 1);
        let events = t.evaluate(Point::new(5, -1), 1);
        assert_eq!(events[0].direction, CrossDirection::BToA);
    }

    #[test]
    fn test_no_movement_no_crossing() {
        let mut t = horizontal();
        assert!(!t.is_cross_line(Point::new(5, 1), 1));
        assert!(!t.is_cross_line(Point::new(5, 1), 1));
    }

    #[test]
    fn test_on_line_never_counts() {
        let mut t = horizontal();
        t.evaluate(Point::new(5, -1), 1);
        assert!(!t.is_cross_line(Point::new(5, 0), 1));
        assert!(!t.is_cross_line(Point::new(5, 1), 1));
    }

    #[test]
    fn test_tracks_are_independent() {
        let mut t = horizontal();
        t.evaluate(Point::new(5, -1), 1);
        // first sighting of track 2 on the far side is only a baseline
        assert!(!t.is_cross_line(Point::new(5, 1), 2));
        assert!(t.is_cross_line(Point::new(5, 1), 1));
    }

    #[test]
    fn test_forgotten_track_starts_from_baseline() {
        let mut t = horizontal();
        t.evaluate(Point::new(5, -1), 1);
        assert_eq!(t.last_position(1), Some(Point::new(5, -1)));

        t.forget(1);
        assert_eq!(t.last_position(1), None);
        assert!(!t.is_cross_line(Point::new(5, 1), 1));
    }

    #[test]
    fn test_multiple_lines_reported_individually() {
        let mut t = horizontal();
        t.add_line(Point::new(0, 0), Point::new(0, 10));
        t.add_line(Point::new(100, 100), Point::new(110, 100));

        t.evaluate(Point::new(1, -1), 7);
        let events = t.evaluate(Point::new(-1, 1), 7);
        let indices: Vec<usize> = events.iter().map(|e| e.line_index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_set_then_clear_lines() {
        let mut t = CrossLineTracker::new();
        t.set_lines(vec![CrossLine::new(Point::new(0, 0), Point::new(10, 0))]);
        assert_eq!(t.lines().len(), 1);

        t.set_lines(Vec::new());
        assert!(t.lines().is_empty());

        t.add_line(Point::new(0, 0), Point::new(10, 0));
        t.clear_lines();
        assert!(t.lines().is_empty());

        t.evaluate(Point::new(5, -1), 1);
        assert!(!t.is_cross_line(Point::new(5, 1), 1));
        assert!(!t.is_cross_line(Point::new(5, -1), 1));
    }

    #[test]
    fn test_line_fits() {
        let line = CrossLine::new(Point::new(0, 0), Point::new(640, 480));
        assert!(line.fits(640, 480));
        assert!(!line.fits(639, 480));
        assert!(!CrossLine::new(Point::new(-1, 0), Point::new(5, 5)).fits(640, 480));
    }

    #[test]
    fn test_draw_uses_line_colour() {
        let mut t = CrossLineTracker::new();
        t.add_line(Point::new(0, 5), Point::new(19, 5));
        let mut frame = Frame::new(20, 20);
        t.draw(&mut frame);
        assert_eq!(*frame.get_pixel(10, 5), LINE_COLORS[0]);
    }
}
