use std::ops::Range;

/// Format a duration in seconds as days/hours/minutes/seconds.
///
/// Zero-valued components are omitted; seconds always appear, with three
/// decimal places. `3661.5` -> `"1 hour, 1 minute, 1.500 seconds"`.
pub fn seconds_to_text(secs: f64) -> String {
    let days    = (secs / 86400.0).floor() as u64;
    let hours   = ((secs - days as f64 * 86400.0) / 3600.0).floor() as u64;
    let minutes = ((secs - days as f64 * 86400.0 - hours as f64 * 3600.0) / 60.0).floor() as u64;
    let seconds = secs - days as f64 * 86400.0 - hours as f64 * 3600.0 - minutes as f64 * 60.0;
    let mut result = String::new();
    if days > 0 {
        result += &format!("{days} day{}, ", if days > 1 { "s" } else { "" });
    }
    if hours > 0 {
        result += &format!("{hours} hour{}, ", if hours > 1 { "s" } else { "" });
    }
    if minutes > 0 {
        result += &format!("{minutes} minute{}, ", if minutes > 1 { "s" } else { "" });
    }
    result + &format!("{seconds:.3} seconds")
}

pub fn parse_range<T: std::str::FromStr>(s: &str) -> Result<Range<T>, <T as std::str::FromStr>::Err> {
    let v = s.split("..").collect::<Vec<_>>();
    if v.len() != 2 {
        panic!("Could not find '..' when parsing range.");
    }
    let x = v[0].parse()?;
    let y = v[1].parse()?;
    Ok(x..y)
}

/// Group numeric digits to facilitate reading long numbers
pub fn group_digits<F: std::fmt::Display>(n: F) -> String {
    use numsep::{separate, Locale};
    separate(n, Locale::English)
}


pub mod timing {

    use super::group_digits;
    use std::time::Instant;
    use std::io::Write;

    pub struct Progress {
        previous: Instant,
    }

    impl Progress {

        #[allow(clippy::new_without_default)]
        pub fn new() -> Self { Self { previous: Instant::now() } }

        /// Print message, append ellipsis, flush stdout, stay on same line, start timer.
        pub fn start(&mut self, message: &str) {
            print!("{message} ... ");
            std::io::stdout().flush().unwrap();
            self.start_timer();
        }

        /// Print message, go to next line, start timer
        pub fn startln(&mut self, message: &str) {
            self.start(message);
            println!();
            self.start_timer();
        }

        // Print time elapsed since last start or done
        pub fn done(&mut self) {
            println!("{} ms", group_digits(self.previous.elapsed().as_millis()));
            self.start_timer();
        }

        // Print message followed by time elapsed since last start or done
        pub fn done_with_message(&mut self, message: &str) {
            println!("{message}: {} ms",
                     group_digits(self.previous.elapsed().as_millis()));
            self.start_timer();
        }

        fn start_timer(&mut self) { self.previous = Instant::now() }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(3661.5   , "1 hour, 1 minute, 1.500 seconds")]
    #[case(0.0      , "0.000 seconds")]
    #[case(59.25    , "59.250 seconds")]
    #[case(60.0     , "1 minute, 0.000 seconds")]
    #[case(86401.0  , "1 day, 1.000 seconds")]
    #[case(172800.0 , "2 days, 0.000 seconds")]
    #[case(7322.0   , "2 hours, 2 minutes, 2.000 seconds")]
    fn formats_durations(#[case] secs: f64, #[case] expected: &str) {
        assert_eq!(seconds_to_text(secs), expected);
    }

    proptest! {
        // The printed components must decompose the input exactly:
        // days*86400 + hours*3600 + minutes*60 + seconds == input
        #[test]
        fn decomposition_reconstructs_input(secs in 0.0..10_000_000.0f64) {
            let text = seconds_to_text(secs);
            let mut total = 0.0;
            for part in text.split(", ") {
                let mut it = part.split_whitespace();
                let n: f64 = it.next().unwrap().parse().unwrap();
                let unit = it.next().unwrap().trim_end_matches('s');
                total += n * match unit {
                    "day"    => 86400.0,
                    "hour"   => 3600.0,
                    "minute" => 60.0,
                    "second" => 1.0,
                    other    => panic!("unexpected unit {other}"),
                };
            }
            prop_assert!((total - secs).abs() < 0.5e-3 + 1e-9 * secs);
        }
    }

    #[test]
    fn parses_ranges() {
        assert_eq!(parse_range::<f32>("0.5..4.5").unwrap(), 0.5..4.5);
        assert_eq!(parse_range::<usize>("0..33").unwrap(), 0..33);
    }
}
