// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use crate::pattern::PatternPoint;

/// Samples a curve at the given time.
///
/// The points must already be sorted by time. Before the first point and after the last point the
/// nearest endpoint is held; there is no extrapolation and no blending across a loop boundary.
pub fn interpolate(points: &[PatternPoint], time_ms: f64) -> f64 {
    let (first, last) = match (points.first(), points.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return 0.0,
    };

    if points.len() == 1 || time_ms < first.time_ms {
        return first.intensity;
    }
    if time_ms > last.time_ms {
        return last.intensity;
    }

    // First adjacent pair with a <= t <= b. Points sharing t resolve to the earliest such pair.
    let end = 1 + points[1..].partition_point(|point| point.time_ms < time_ms);
    let (a, b) = (&points[end - 1], &points[end]);

    let span = b.time_ms - a.time_ms;
    if span <= 0.0 {
        return b.intensity;
    }

    a.intensity + (b.intensity - a.intensity) * (time_ms - a.time_ms) / span
}

#[cfg(test)]
mod test {
    use crate::pattern::PatternPoint;

    use super::interpolate;

    fn points(raw: &[(f64, f64)]) -> Vec<PatternPoint> {
        raw.iter()
            .map(|(time_ms, intensity)| PatternPoint::new(*time_ms, *intensity))
            .collect()
    }

    #[test]
    fn test_no_points() {
        assert_eq!(interpolate(&[], 0.0), 0.0);
        assert_eq!(interpolate(&[], 1234.0), 0.0);
    }

    #[test]
    fn test_single_point_is_constant() {
        let points = points(&[(5000.0, 40.0)]);
        for t in [0.0, 1.0, 4999.0, 5000.0, 7500.0, 9999.0] {
            assert_eq!(interpolate(&points, t), 40.0, "t = {}", t);
        }
    }

    #[test]
    fn test_two_points() {
        let points = points(&[(0.0, 0.0), (10000.0, 100.0)]);
        assert_eq!(interpolate(&points, 5000.0), 50.0);
        assert_eq!(interpolate(&points, 0.0), 0.0);
        assert!((interpolate(&points, 9999.0) - 99.99).abs() < 1e-9);
    }

    #[test]
    fn test_edge_hold() {
        let points = points(&[(2000.0, 30.0), (8000.0, 90.0)]);
        let duration_ms = 10000.0;

        assert_eq!(interpolate(&points, 0.0), 30.0);
        assert_eq!(interpolate(&points, 1999.0), 30.0);
        assert_eq!(interpolate(&points, 9000.0), 90.0);
        // 15000 wraps to 5000, which sits between the two points.
        assert_eq!(interpolate(&points, 15000.0 % duration_ms), 60.0);
        // 11000 wraps to 1000, which is held at the first point rather than blended with the end.
        assert_eq!(interpolate(&points, 11000.0 % duration_ms), 30.0);
    }

    #[test]
    fn test_shared_time_is_a_step() {
        let points = points(&[(0.0, 0.0), (500.0, 20.0), (500.0, 80.0), (1000.0, 80.0)]);
        assert_eq!(interpolate(&points, 250.0), 10.0);
        assert_eq!(interpolate(&points, 500.0), 20.0);
        assert_eq!(interpolate(&points, 750.0), 80.0);
    }

    #[test]
    fn test_shared_time_at_the_ends() {
        let start = points(&[(0.0, 20.0), (0.0, 80.0), (1000.0, 80.0)]);
        assert_eq!(interpolate(&start, 0.0), 80.0);
        assert_eq!(interpolate(&start, 0.001), 80.0);

        let end = points(&[(0.0, 0.0), (1000.0, 20.0), (1000.0, 80.0)]);
        assert_eq!(interpolate(&end, 1000.0), 20.0);
        assert_eq!(interpolate(&end, 500.0), 10.0);
        assert_eq!(interpolate(&end, 1500.0), 80.0);
    }

    #[test]
    fn test_between_adjacent_points() {
        let points = points(&[
            (0.0, 10.0),
            (100.0, 90.0),
            (350.0, 5.0),
            (400.0, 5.0),
            (1000.0, 100.0),
        ]);

        for pair in points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let low = a.intensity.min(b.intensity);
            let high = a.intensity.max(b.intensity);
            let steps = 50;
            for step in 0..=steps {
                let t = a.time_ms + (b.time_ms - a.time_ms) * step as f64 / steps as f64;
                let value = interpolate(&points, t);
                assert!(
                    value >= low - 1e-9 && value <= high + 1e-9,
                    "value {} at t = {} outside of [{}, {}]",
                    value,
                    t,
                    low,
                    high
                );
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let points = points(&[(0.0, 0.0), (300.0, 70.0), (900.0, 20.0)]);
        let first: Vec<f64> = (0..100)
            .map(|t| interpolate(&points, t as f64 * 10.0))
            .collect();
        let second: Vec<f64> = (0..100)
            .rev()
            .map(|t| interpolate(&points, t as f64 * 10.0))
            .rev()
            .collect();
        assert_eq!(first, second);
    }
}
