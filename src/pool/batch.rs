// Batch framing: N commands joined into one remote invocation, outputs split on sentinel lines.
//
// Wire format: `echo '<SENTINEL>'; <cmd_1>; echo '<SENTINEL>'; <cmd_2>; ...`

/// Marker line emitted before each command's output. Commands must never print it themselves.
pub const SENTINEL: &str = "___CMD_START___";

/// Joins `commands` into a single shell invocation, each preceded by a sentinel echo.
pub fn build_batch_command<S: AsRef<str>>(commands: &[S]) -> String {
    commands
        .iter()
        .map(|cmd| format!("echo '{SENTINEL}'; {}", cmd.as_ref()))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Splits combined output into one segment per sentinel line.
///
/// Text before the first sentinel (login banners and the like) is discarded. A sentinel
/// followed directly by another sentinel yields an empty segment, so segment `i` always
/// belongs to command `i`. Lines inside a segment are rejoined with `\n`; the trailing
/// newline of each command's output is not kept.
pub fn split_batch_output(output: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in output.lines() {
        if line == SENTINEL {
            if let Some(lines) = current.take() {
                segments.push(lines.join("\n"));
            }
            current = Some(Vec::new());
        } else if let Some(lines) = current.as_mut() {
            lines.push(line);
        }
    }
    if let Some(lines) = current {
        segments.push(lines.join("\n"));
    }
    segments
}
