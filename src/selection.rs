//! Picking one device out of several candidates, asking the user when the
//! choice is ambiguous.

use crate::catalog::Device;
use crate::error::{checked, Error, Result};
use std::io::{BufRead, Write};

/// Lists candidate devices and resolves the choice.
///
/// With a single candidate it is used without asking. With several, the
/// user is prompted for an index until a valid one is entered. When
/// prompting is not allowed, or input ends, an ambiguous choice fails with
/// [`Error::Selection`].
#[derive(Debug, Clone, Copy)]
pub struct DeviceSelector<'a> {
    candidates: &'a [Device],
    interactive: bool,
    requirement: Option<&'a str>,
}

impl<'a> DeviceSelector<'a> {
    pub fn new(candidates: &'a [Device]) -> Self {
        Self {
            candidates,
            interactive: true,
            requirement: None,
        }
    }

    pub fn interactive(mut self, enable: bool) -> Self {
        self.interactive = enable;
        self
    }

    /// Names the capability the candidates were filtered on, e.g.
    /// `"double precision"`. It is mentioned in the listing.
    pub fn requirement(mut self, requirement: &'a str) -> Self {
        self.requirement = Some(requirement);
        self
    }

    pub fn select<R: BufRead, W: Write>(&self, input: R, out: &mut W) -> Result<Device> {
        checked("selectDevice", self.select_inner(input, out))
    }

    fn select_inner<R: BufRead, W: Write>(&self, mut input: R, out: &mut W) -> Result<Device> {
        match self.candidates {
            [] => {
                let msg = match self.requirement {
                    Some(req) => format!("No device supports {}.", req),
                    None => "No devices found".to_string(),
                };
                return Err(Error::selection(msg));
            }
            [only] => {
                match self.requirement {
                    Some(req) => {
                        self.list(out)?;
                        writeln!(
                            out,
                            "\nNo other device in the requested device category supports {}.",
                            req
                        )?;
                        writeln!(
                            out,
                            "You may want to try the -a command line option to see if there are others."
                        )?;
                        writeln!(out, "For now, I will use the one I found.")?;
                    }
                    None => writeln!(out, "Only one device detected")?,
                }
                return Ok(only.clone());
            }
            _ => {}
        }

        self.list(out)?;
        if !self.interactive {
            return Err(Error::selection(format!(
                "{} candidate devices and prompting is disabled",
                self.candidates.len()
            )));
        }

        let mut line = String::new();
        loop {
            write!(out, "Which device do you want to use? ")?;
            out.flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                return Err(Error::selection("input ended before a device was chosen"));
            }
            match line.trim().parse::<usize>() {
                Ok(index) if index < self.candidates.len() => {
                    return Ok(self.candidates[index].clone());
                }
                _ => tracing::debug!(input = line.trim(), "rejected device index"),
            }
        }
    }

    fn list<W: Write>(&self, out: &mut W) -> Result<()> {
        for (index, device) in self.candidates.iter().enumerate() {
            match self.requirement {
                Some(req) => writeln!(out, "Device {}: [{}] supports {}.", index, device.name(), req)?,
                None => writeln!(out, "Device {}: {}", index, device.name())?,
            }
        }
        Ok(())
    }
}

/// Shorthand for `DeviceSelector::new(candidates).interactive(..).select(..)`.
pub fn select_device<R: BufRead, W: Write>(
    candidates: &[Device],
    interactive: bool,
    input: R,
    out: &mut W,
) -> Result<Device> {
    DeviceSelector::new(candidates)
        .interactive(interactive)
        .select(input, out)
}
