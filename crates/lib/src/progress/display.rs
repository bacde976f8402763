//! Console rendering of build progress.
//!
//! Output follows a plain, line-oriented layout: each vertex gets a number on
//! first sight and every later line about it is prefixed with `#N`.
//!
//! ```text
//! #1 resolve image alpine:3.15
//! #1 DONE
//! #2 copy /src
//! #2 CACHED
//! => base image uses a deprecated tag
//! ```

use std::collections::{HashMap, HashSet};
use std::io::{self, IsTerminal, Write};

use owo_colors::{OwoColorize, Style};

use super::{SolveStatus, VertexWarning};

/// Renders status events as they arrive.
pub trait ProgressDisplay: Send {
  fn update(&mut self, status: &SolveStatus) -> io::Result<()>;

  /// Called once after the event stream has closed.
  fn finish(&mut self, warnings: &[VertexWarning]) -> io::Result<()>;
}

pub struct ConsoleDisplay<W> {
  out: W,
  color: bool,
  numbers: HashMap<String, usize>,
  started: HashSet<String>,
  finished: HashSet<String>,
}

impl ConsoleDisplay<io::Stderr> {
  /// Display writing to stderr, coloured when stderr is a terminal.
  pub fn stderr() -> Self {
    let color = io::stderr().is_terminal();
    Self::new(io::stderr(), color)
  }
}

impl<W: Write + Send> ConsoleDisplay<W> {
  pub fn new(out: W, color: bool) -> Self {
    Self {
      out,
      color,
      numbers: HashMap::new(),
      started: HashSet::new(),
      finished: HashSet::new(),
    }
  }

  pub fn into_inner(self) -> W {
    self.out
  }

  fn number(&mut self, digest: &str) -> usize {
    let next = self.numbers.len() + 1;
    *self.numbers.entry(digest.to_string()).or_insert(next)
  }

  fn paint(&self, text: &str, style: Style) -> String {
    if self.color {
      text.style(style).to_string()
    } else {
      text.to_string()
    }
  }
}

impl<W: Write + Send> ProgressDisplay for ConsoleDisplay<W> {
  fn update(&mut self, status: &SolveStatus) -> io::Result<()> {
    for vertex in &status.vertexes {
      let n = self.number(&vertex.digest);

      if (vertex.started || vertex.completed) && self.started.insert(vertex.digest.clone()) {
        writeln!(self.out, "#{} {}", n, vertex.name)?;
      }

      if !vertex.completed || !self.finished.insert(vertex.digest.clone()) {
        continue;
      }
      let outcome = match (&vertex.error, vertex.cached) {
        (Some(error), _) => self.paint(&format!("ERROR: {}", error), Style::new().red().bold()),
        (None, true) => self.paint("CACHED", Style::new().blue()),
        (None, false) => self.paint("DONE", Style::new().green()),
      };
      writeln!(self.out, "#{} {}", n, outcome)?;
    }

    for sub in &status.statuses {
      if !sub.completed {
        continue;
      }
      let n = self.number(&sub.vertex);
      if sub.total > 0 {
        writeln!(self.out, "#{} {} {}/{} done", n, sub.id, sub.current, sub.total)?;
      } else {
        writeln!(self.out, "#{} {} done", n, sub.id)?;
      }
    }

    for log in &status.logs {
      let n = self.number(&log.vertex);
      for line in log.data.lines() {
        writeln!(self.out, "#{} {}", n, line)?;
      }
    }

    self.out.flush()
  }

  fn finish(&mut self, warnings: &[VertexWarning]) -> io::Result<()> {
    for warning in warnings {
      let line = format!("=> {}", warning.short);
      writeln!(self.out, "{}", self.paint(&line, Style::new().yellow()))?;
    }
    self.out.flush()
  }
}
