/// Linear map from a data interval onto a pixel interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub lo: f64,
    pub hi: f64,
}

impl Scale {
    /// Position of `v` between `from` (at `lo`) and `to` (at `hi`).
    pub fn map(&self, v: f64, from: f64, to: f64) -> f64 {
        let span = self.hi - self.lo;
        if span == 0.0 {
            return (from + to) / 2.0;
        }
        from + (v - self.lo) / span * (to - from)
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.lo.min(self.hi) && v <= self.lo.max(self.hi)
    }
}

/// Major ticks carry a label; minor ticks do not.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub value: f64,
    pub label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Axis {
    pub scale: Scale,
    pub ticks: Vec<Tick>,
    pub title: String,
}

impl Axis {
    /// Value axis covering `[lo, hi]` with roughly `target` major intervals.
    ///
    /// The range is widened outward to whole steps. One unlabelled tick sits
    /// halfway between majors.
    pub fn values(lo: f64, hi: f64, target: usize) -> Self {
        let (lo, hi) = if hi - lo > f64::EPSILON * hi.abs().max(1.0) {
            (lo, hi)
        } else {
            let pad = if lo == 0.0 { 1.0 } else { lo.abs() * 0.1 };
            (lo - pad, hi + pad)
        };
        let step = nice_step((hi - lo) / target.max(1) as f64);
        let first = (lo / step).floor() as i64;
        let last = (hi / step).ceil() as i64;
        let decimals = decimals_for(step);

        let mut ticks = Vec::with_capacity(2 * (last - first + 1) as usize);
        for i in first..=last {
            let value = i as f64 * step;
            if i > first {
                ticks.push(Tick { value: value - step / 2.0, label: None });
            }
            ticks.push(Tick { value, label: Some(tick_label(value, decimals)) });
        }
        Self {
            scale: Scale { lo: first as f64 * step, hi: last as f64 * step },
            ticks,
            title: String::new(),
        }
    }

    /// Calendar-year axis padded half a year on each side.
    ///
    /// Every year gets a tick; only every second year is labelled past 12
    /// years and every fifth past 24.
    pub fn years(first: i32, last: i32) -> Self {
        let (first, last) = (first.min(last), first.max(last));
        let stride = match last - first + 1 {
            n if n > 24 => 5,
            n if n > 12 => 2,
            _ => 1,
        };
        let ticks = (first..=last)
            .map(|y| Tick {
                value: f64::from(y),
                label: (y.rem_euclid(stride) == 0 || stride == 1).then(|| y.to_string()),
            })
            .collect();
        Self {
            scale: Scale { lo: f64::from(first) - 0.5, hi: f64::from(last) + 0.5 },
            ticks,
            title: String::new(),
        }
    }

    pub fn titled(self, title: &str) -> Self {
        Self { title: title.to_string(), ..self }
    }

    pub fn major(&self) -> impl Iterator<Item = (f64, &str)> {
        self.ticks.iter().filter_map(|t| t.label.as_deref().map(|l| (t.value, l)))
    }

    pub fn minor(&self) -> impl Iterator<Item = f64> + '_ {
        self.ticks.iter().filter(|t| t.label.is_none()).map(|t| t.value)
    }
}

/// Smallest of 1, 2, 2.5, 5 or 10 times a power of ten that is at least `raw`.
fn nice_step(raw: f64) -> f64 {
    if !(raw.is_finite() && raw > 0.0) {
        return 1.0;
    }
    let magnitude = 10f64.powf(raw.log10().floor());
    let mantissa = raw / magnitude;
    let nice = [1.0, 2.0, 2.5, 5.0, 10.0]
        .into_iter()
        .find(|&m| m >= mantissa - 1e-9)
        .unwrap_or(10.0);
    nice * magnitude
}

/// Decimal places needed to print multiples of `step` exactly.
fn decimals_for(step: f64) -> usize {
    let mut d = 0;
    let mut scaled = step;
    while d < 6 && (scaled - scaled.round()).abs() > 1e-9 * scaled.abs().max(1.0) {
        scaled *= 10.0;
        d += 1;
    }
    d
}

fn tick_label(value: f64, decimals: usize) -> String {
    if decimals > 0 {
        return format!("{value:.decimals$}");
    }
    let rounded = value.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut out = String::new();
    if rounded < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn steps_round_up_to_nice_values() {
        assert!(close(nice_step(3.2), 5.0));
        assert!(close(nice_step(0.7), 1.0));
        assert!(close(nice_step(15.0), 20.0));
        assert!(close(nice_step(1.2), 2.0));
        assert!(close(nice_step(2.2), 2.5));
        assert!(close(nice_step(-1.0), 1.0));
    }

    #[test]
    fn value_axis_covers_data() {
        let ax = Axis::values(4870.0, 8120.0, 5);
        assert!(ax.scale.lo <= 4870.0 && ax.scale.hi >= 8120.0);
        let labels: Vec<&str> = ax.major().map(|(_, l)| l).collect();
        assert_eq!(labels, vec!["4,000", "5,000", "6,000", "7,000", "8,000", "9,000"]);
        assert_eq!(ax.minor().count(), labels.len() - 1);
    }

    #[test]
    fn fractional_steps_keep_decimals() {
        let ax = Axis::values(0.0, 1.0, 4);
        let labels: Vec<&str> = ax.major().map(|(_, l)| l).collect();
        assert_eq!(labels, vec!["0.00", "0.25", "0.50", "0.75", "1.00"]);
        assert_eq!(tick_label(-12500.0, 0), "-12,500");
        assert_eq!(tick_label(-0.2, 0), "0");
    }

    #[test]
    fn flat_data_still_gets_a_range() {
        let ax = Axis::values(100.0, 100.0, 5);
        assert!(ax.scale.hi > ax.scale.lo);
        assert!(ax.scale.contains(100.0));
    }

    #[test]
    fn year_axis_labels_every_year() {
        let ax = Axis::years(2016, 2021);
        let labels: Vec<&str> = ax.major().map(|(_, l)| l).collect();
        assert_eq!(labels, vec!["2016", "2017", "2018", "2019", "2020", "2021"]);
        assert_eq!((ax.scale.lo, ax.scale.hi), (2015.5, 2021.5));
        assert_eq!(ax.minor().count(), 0);
        assert!(close(ax.scale.map(2018.5, 0.0, 600.0), 300.0));
    }

    #[test]
    fn long_year_axis_is_thinned() {
        let ax = Axis::years(1996, 2021);
        assert!(ax.major().all(|(_, l)| l.ends_with('0') || l.ends_with('5')));
        assert_eq!(ax.ticks.len(), 26);
        let ax = Axis::years(2006, 2021);
        assert_eq!(ax.major().count(), 8);
    }
}
