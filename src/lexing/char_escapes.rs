//! String literal escapes (§4.2): `\0 \b \r \t \n \' \" \\`.

use std::collections::HashMap;

/// Map escape characters to the literal characters they represent.
pub fn new() -> HashMap<char, char> {
    let mut map = HashMap::new();
    map.extend(vec![
        ('0', '\0'),
        ('b', '\u{8}'),
        ('r', '\r'),
        ('t', '\t'),
        ('n', '\n'),
        ('\'', '\''),
        ('"', '"'),
        ('\\', '\\'),
    ]);
    map
}
