//! Placeholder substitution of the tunnel's local port into command arguments.

/// The literal marker replaced by the local port. No escaping rules: every
/// occurrence in every argument is substituted.
pub const PORT_TOKEN: &str = "{}";

/// Replace every occurrence of [`PORT_TOKEN`] in every argument with the
/// decimal representation of `port`.
///
/// Pure: the input is untouched and the output always has the same length.
/// Arguments without the token come back unchanged, and a command line that
/// never mentions the token is perfectly valid.
pub fn expand_args(args: &[String], port: u16) -> Vec<String> {
    let port = port.to_string();
    args.iter().map(|arg| arg.replace(PORT_TOKEN, &port)).collect()
}
