//! The single-byte character set of controller pak note names.
use std::sync::LazyLock;

use rustc_hash::FxHashMap;

/// Decoded in place of bytes outside of the character set.
pub const REPLACEMENT: char = char::REPLACEMENT_CHARACTER;

const R: char = REPLACEMENT;

#[rustfmt::skip]
const DECODE: [char; 149] = [
    '\0', R, R, R, R, R, R, R, R, R, R, R, R, R, R, ' ',
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F',
    'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V',
    'W', 'X', 'Y', 'Z', '!', '"', '#', '\'', '*', '+', ',', '-', '.', '/', ':', '=',
    '?', '@', '。', '゛', '゜', 'ァ', 'ィ', 'ゥ', 'ェ', 'ォ', 'ッ', 'ャ', 'ュ', 'ョ', 'ヲ', 'ン',
    'ア', 'イ', 'ウ', 'エ', 'オ', 'カ', 'キ', 'ク', 'ケ', 'コ', 'サ', 'シ', 'ス', 'セ', 'ソ', 'タ',
    'チ', 'ツ', 'テ', 'ト', 'ナ', 'ニ', 'ヌ', 'ネ', 'ノ', 'ハ', 'ヒ', 'フ', 'ヘ', 'ホ', 'マ', 'ミ',
    'ム', 'メ', 'モ', 'ヤ', 'ユ', 'ヨ', 'ラ', 'リ', 'ル', 'レ', 'ロ', 'ワ', 'ガ', 'ギ', 'グ', 'ゲ',
    'ゴ', 'ザ', 'ジ', 'ズ', 'ゼ', 'ゾ', 'ダ', 'ヂ', 'ヅ', 'デ', 'ド', 'バ', 'ビ', 'ブ', 'ベ', 'ボ',
    'パ', 'ピ', 'プ', 'ペ', 'ポ',
];

static ENCODE: LazyLock<FxHashMap<char, u8>> = LazyLock::new(|| {
    DECODE
        .iter()
        .enumerate()
        .filter(|&(_, &c)| c != REPLACEMENT)
        .map(|(byte, &c)| (c, byte as u8))
        .collect()
});

pub fn decode_char(byte: u8) -> char {
    DECODE.get(byte as usize).copied().unwrap_or(REPLACEMENT)
}

pub fn encode_char(c: char) -> Option<u8> {
    ENCODE.get(&c).copied()
}

/// Decodes up to the first NUL.
pub fn decode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&byte| byte != 0)
        .map(|&byte| decode_char(byte))
        .collect()
}

/// Encodes `text`, or returns the first character that can't be.
pub fn encode(text: &str) -> Result<Vec<u8>, char> {
    text.chars().map(|c| encode_char(c).ok_or(c)).collect()
}
