//! Checksum and structural validators for Brazilian identifiers.
//!
//! Every function is total: any input, including empty strings and non-ASCII
//! text, yields `true` or `false` and never panics.

/// Connector words ignored when validating a proper name.
pub(crate) const NAME_CONNECTORS: &[&str] = &[
    "da", "de", "do", "dos", "das", "e", "von", "van", "la", "le", "di",
];

const CNPJ_FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const CNPJ_SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const PIS_WEIGHTS: [u32; 10] = [3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Highest voter-ID state code (01 = SP ... 28 = ZZ, abroad).
const VOTER_ID_MAX_STATE: u32 = 28;

fn digits(input: &str) -> Vec<u32> {
    input.chars().filter_map(|c| c.to_digit(10)).collect()
}

fn all_identical(digits: &[u32]) -> bool {
    digits.windows(2).all(|w| w[0] == w[1])
}

/// Mod-11 check digit shared by CPF and CNPJ: remainder < 2 gives 0.
fn mod11_check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    let remainder = sum % 11;
    if remainder < 2 {
        0
    } else {
        11 - remainder
    }
}

/// CPF (Cadastro de Pessoas Físicas): 11 digits, two mod-11 check digits.
/// Punctuation is ignored.
pub fn cpf(input: &str) -> bool {
    let d = digits(input);
    if d.len() != 11 || all_identical(&d) {
        return false;
    }
    let first_weights: Vec<u32> = (2..=10).rev().collect();
    let second_weights: Vec<u32> = (2..=11).rev().collect();
    mod11_check_digit(&d[..9], &first_weights) == d[9]
        && mod11_check_digit(&d[..10], &second_weights) == d[10]
}

/// CNPJ (Cadastro Nacional da Pessoa Jurídica): 14 digits, two mod-11 check digits.
pub fn cnpj(input: &str) -> bool {
    let d = digits(input);
    if d.len() != 14 || all_identical(&d) {
        return false;
    }
    mod11_check_digit(&d[..12], &CNPJ_FIRST_WEIGHTS) == d[12]
        && mod11_check_digit(&d[..13], &CNPJ_SECOND_WEIGHTS) == d[13]
}

/// PIS/PASEP/NIT: 11 digits, one check digit where 10 and 11 fold to 0.
pub fn pis_pasep(input: &str) -> bool {
    let d = digits(input);
    if d.len() != 11 || all_identical(&d) {
        return false;
    }
    let sum: u32 = d[..10].iter().zip(PIS_WEIGHTS).map(|(d, w)| d * w).sum();
    let check = match 11 - (sum % 11) {
        10 | 11 => 0,
        n => n,
    };
    check == d[10]
}

/// Título de Eleitor: 8 sequence digits, 2 state digits, 2 check digits.
pub fn voter_id(input: &str) -> bool {
    let d = digits(input);
    if d.len() != 12 || all_identical(&d) {
        return false;
    }
    let state = d[8] * 10 + d[9];
    if state == 0 || state > VOTER_ID_MAX_STATE {
        return false;
    }
    // SP and MG map a zero result to 1
    let fold = |value: u32| -> u32 {
        match value {
            10 => 0,
            0 if state == 1 || state == 2 => 1,
            n => n,
        }
    };
    let first_sum: u32 = d[..8]
        .iter()
        .enumerate()
        .map(|(i, digit)| digit * (i as u32 + 2))
        .sum();
    let first = fold(first_sum % 11);
    let second = fold((d[8] * 7 + d[9] * 8 + first * 9) % 11);
    first == d[10] && second == d[11]
}

/// Brazilian phone number, landline or mobile, with or without the +55 prefix.
///
/// Heuristic: area code (DDD) without zero digits, mobiles carry 9 digits
/// starting with 9, landlines 8 digits starting with 2-8.
pub fn phone(input: &str) -> bool {
    let mut d = digits(input);
    if (d.len() == 12 || d.len() == 13) && d[0] == 5 && d[1] == 5 {
        d.drain(..2);
    }
    if d.len() != 10 && d.len() != 11 {
        return false;
    }
    if d[0] == 0 || d[1] == 0 {
        return false;
    }
    let subscriber = &d[2..];
    if all_identical(subscriber) {
        return false;
    }
    match subscriber.len() {
        9 => subscriber[0] == 9,
        8 => (2..=8).contains(&subscriber[0]),
        _ => false,
    }
}

/// CEP (postal code): 8 digits, not all identical.
pub fn cep(input: &str) -> bool {
    let d = digits(input);
    d.len() == 8 && !all_identical(&d)
}

fn is_latin_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || (c.is_alphabetic() && ('\u{00C0}'..='\u{024F}').contains(&c))
}

fn is_capitalized_token(token: &str) -> bool {
    let mut chars = token.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(is_latin_letter(first) && first.is_uppercase()) {
        return false;
    }
    let rest: Vec<char> = chars.collect();
    !rest.is_empty()
        && rest
            .iter()
            .all(|&c| (is_latin_letter(c) && c.is_lowercase()) || c == '\'' || c == '-')
}

/// Brazilian proper name: at least two capitalized Latin tokens once
/// connectors ("da", "dos", "e", ...) are discarded.
pub fn brazilian_name(input: &str) -> bool {
    let tokens: Vec<&str> = input
        .split_whitespace()
        .filter(|token| {
            !NAME_CONNECTORS
                .iter()
                .any(|connector| token.eq_ignore_ascii_case(connector))
        })
        .collect();
    tokens.len() >= 2 && tokens.iter().all(|token| is_capitalized_token(token))
}
