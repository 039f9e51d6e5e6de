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

/// Outputs the given number of milliseconds in a minutes:seconds.millis format. Negative and
/// non-finite values are shown as zero.
pub fn format_millis(millis: f64) -> String {
    let millis = if millis.is_finite() && millis > 0.0 {
        millis.round() as u64
    } else {
        0
    };
    let minutes = millis / 60_000;
    let secs = (millis / 1000) % 60;
    format!("{}:{:02}.{:03}", minutes, secs, millis % 1000)
}

#[cfg(test)]
mod test {
    use crate::util::format_millis;

    #[test]
    fn test_format_millis() {
        assert_eq!("0:00.000", format_millis(0.0));
        assert_eq!("0:00.250", format_millis(250.0));
        assert_eq!("0:05.000", format_millis(5000.0));
        assert_eq!("0:55.001", format_millis(55000.6));
        assert_eq!("1:00.000", format_millis(60000.0));
        assert_eq!("2:05.500", format_millis(125500.0));
        assert_eq!("60:06.000", format_millis(3606000.0));
        assert_eq!("0:00.000", format_millis(-20.0));
        assert_eq!("0:00.000", format_millis(f64::NAN));
    }
}
