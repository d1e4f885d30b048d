use rand::Rng;

const REFERRAL_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const REFERRAL_SUFFIX_LEN: usize = 8;

pub const STUDENT_REFERRAL_PREFIX: &str = "STU";
pub const REFERRER_CODE_PREFIX: &str = "REF";

/// NIM prefix: start year of the academic year followed by the program code,
/// e.g. `"2025/2026"` + `"IF"` -> `"2025IF"`.
pub fn student_number_prefix(academic_year: &str, program_code: &str) -> String {
    let year: String = academic_year.chars().take(4).collect();
    format!("{}{}", year, program_code.trim().to_uppercase())
}

pub fn format_student_number(prefix: &str, sequence: u32) -> String {
    format!("{}{:04}", prefix, sequence)
}

/// True when `number` is `prefix` followed by a sequence and nothing else, so `2025TIA0001`
/// does not count towards `2025TI`.
pub fn is_student_number_under(number: &str, prefix: &str) -> bool {
    number
        .strip_prefix(prefix)
        .is_some_and(|seq| !seq.is_empty() && seq.bytes().all(|b| b.is_ascii_digit()))
}

/// `PREFIX-XXXXXXXX`, avoiding look-alike characters (0/O, 1/I).
pub fn generate_referral_code(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..REFERRAL_SUFFIX_LEN)
        .map(|_| REFERRAL_ALPHABET[rng.gen_range(0..REFERRAL_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", prefix, suffix)
}
