use std::{
	env,
	time::{Duration, Instant},
};

const REDRAW_INTERVAL: Duration = Duration::from_millis(500);

pub struct Inner {
	pub message: String,
	pub total: u64,
	pub completed: u64,
	pub failed: u64,
	pub start: Instant,
	pub finished: bool,
	last_draw: Option<Instant>,
}

impl Inner {
	pub fn new(message: &str, total: u64) -> Self {
		Inner {
			message: message.to_string(),
			total,
			completed: 0,
			failed: 0,
			start: Instant::now(),
			finished: false,
			last_draw: None,
		}
	}

	/// Items handled so far, successful or not.
	pub fn position(&self) -> u64 {
		self.completed.saturating_add(self.failed).min(self.total)
	}

	pub fn redraw(&mut self) {
		if let Some(last_draw) = self.last_draw
			&& last_draw.elapsed() < REDRAW_INTERVAL
			&& !self.finished
		{
			return;
		}
		self.last_draw = Some(Instant::now());

		let line = self.render(terminal_width());
		self.write(&format!("\r\x1b[2K{line}"));
	}

	pub fn render(&self, width: usize) -> String {
		let total = self.total.max(1);
		let pos = self.position();
		let msg = &self.message;
		let elapsed = self.start.elapsed().as_secs_f64();
		let per_sec = if elapsed > 0.0 { pos as f64 / elapsed } else { 0.0 };
		let eta_secs = if pos > 0 {
			elapsed * ((total.saturating_sub(pos)) as f64 / pos as f64)
		} else {
			0.0
		};

		let percent = (pos as f64 * 100.0 / total as f64).floor() as u64;
		let failed = if self.failed > 0 {
			format!(" {} failed", self.failed)
		} else {
			String::new()
		};
		let rate = format_rate(per_sec);
		let eta = format_eta(Duration::from_secs_f64(eta_secs));

		let get_line =
			|bar: &str| format!("{msg}▕{bar}▏{pos}/{}{failed} ({percent:>3}%) {rate:>5} {eta:>5}", self.total);
		let bar_width = width.saturating_sub(get_line("").chars().count()).max(10);
		get_line(&make_bar(pos, total, bar_width))
	}

	#[allow(unused_variables)]
	pub fn write(&self, line: &str) {
		#[cfg(all(feature = "cli", not(any(test, feature = "test"))))]
		{
			use std::io::Write;
			let mut output = std::io::stderr();
			let _ = write!(output, "{line}");
			let _ = output.flush();
		}
	}
}

// prefer $COLUMNS, fall back to 80
fn terminal_width() -> usize {
	env::var("COLUMNS")
		.ok()
		.and_then(|cols| cols.parse::<usize>().ok())
		.map_or(80, |width| width.max(20))
}

fn make_bar(pos: u64, total: u64, width: usize) -> String {
	let fraction = (pos as f64 / total.max(1) as f64).clamp(0.0, 1.0);
	let exact = fraction * width as f64;
	let whole = (exact.floor() as usize).min(width);

	// eighths, thickest first
	let partials = ['█', '▉', '▊', '▋', '▌', '▍', '▎', '▏'];

	let mut bar = "█".repeat(whole);
	if whole < width {
		let eighths = ((exact - whole as f64) * 8.0).floor() as usize;
		bar.push(if eighths > 0 { partials[8 - eighths.min(7)] } else { ' ' });
		bar.push_str(&" ".repeat(width - whole - 1));
	}
	bar
}

fn format_rate(per_sec: f64) -> String {
	if !per_sec.is_finite() {
		return "--/s".to_string();
	}
	let abs = per_sec.abs();
	if abs >= 1_000_000.0 {
		format!("{:.1}M/s", per_sec / 1_000_000.0)
	} else if abs >= 1_000.0 {
		format!("{:.1}k/s", per_sec / 1_000.0)
	} else {
		format!("{per_sec:.0}/s")
	}
}

fn format_eta(duration: Duration) -> String {
	let total = duration.as_secs();
	let hours = total / 3_600;
	let minutes = (total % 3_600) / 60;
	let seconds = total % 60;
	if hours > 0 {
		format!("{hours:02}:{minutes:02}:{seconds:02}")
	} else {
		format!("{minutes:02}:{seconds:02}")
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case(0, 10, 10, "          ")]
	#[case(10, 10, 10, "██████████")]
	#[case(5, 10, 4, "██  ")]
	#[case(1, 16, 2, "▏ ")]
	fn bar_shapes(#[case] pos: u64, #[case] total: u64, #[case] width: usize, #[case] expected: &str) {
		assert_eq!(make_bar(pos, total, width), expected);
	}

	#[rstest]
	#[case(0, "00:00")]
	#[case(75, "01:15")]
	#[case(3_725, "01:02:05")]
	fn eta(#[case] secs: u64, #[case] expected: &str) {
		assert_eq!(format_eta(Duration::from_secs(secs)), expected);
	}

	#[test]
	fn rates() {
		assert_eq!(format_rate(12.4), "12/s");
		assert_eq!(format_rate(2_500.0), "2.5k/s");
		assert_eq!(format_rate(f64::NAN), "--/s");
	}

	#[test]
	fn render_mentions_failures() {
		let mut inner = Inner::new("tiles", 20);
		inner.completed = 8;
		inner.failed = 2;
		let line = inner.render(80);
		assert!(line.starts_with("tiles▕"));
		assert!(line.contains("▏10/20 2 failed ( 50%)"), "{line}");
		assert_eq!(line.chars().count(), 80);
	}
}
