//! Structural CPF handling. No check digits are verified, only the shape.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A CPF made of exactly eleven digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cpf([u8; 11]);

impl Cpf {
    /// Accepts the bare digits or the usual `000.000.000-00` punctuation, with optional
    /// spaces. Anything else, or a digit count other than eleven, is rejected.
    pub fn parse(raw: &str) -> Option<Cpf> {
        let mut digits = [0u8; 11];
        let mut n = 0;
        for c in raw.chars() {
            match c {
                '0'..='9' => {
                    if n == digits.len() {
                        return None;
                    }
                    digits[n] = c as u8 - b'0';
                    n += 1;
                }
                '.' | '-' | '/' | ' ' => {}
                _ => return None,
            }
        }
        (n == digits.len()).then_some(Cpf(digits))
    }

    pub fn digits(&self) -> String {
        self.0.iter().map(|d| char::from(b'0' + d)).collect()
    }
}

impl fmt::Display for Cpf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.digits();
        write!(f, "{}.{}.{}-{}", &d[0..3], &d[3..6], &d[6..9], &d[9..11])
    }
}

impl TryFrom<String> for Cpf {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Cpf::parse(&value).ok_or_else(|| format!("invalid CPF `{value}`"))
    }
}

impl From<Cpf> for String {
    fn from(value: Cpf) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format() {
        let cpf = Cpf::parse("52998224725").unwrap();
        assert_eq!(cpf.to_string(), "529.982.247-25");
        assert_eq!(Cpf::parse("529.982.247-25"), Some(cpf.clone()));
        assert_eq!(Cpf::parse(" 529 982 247 25 "), Some(cpf));
    }

    #[test]
    fn test_rejects_wrong_shapes() {
        assert_eq!(Cpf::parse("123"), None);
        assert_eq!(Cpf::parse(""), None);
        assert_eq!(Cpf::parse("529982247250"), None);
        assert_eq!(Cpf::parse("5299822472a"), None);
        assert_eq!(Cpf::parse("abc52998224725"), None);
    }

    #[test]
    fn test_serde_uses_display_form() {
        let cpf = Cpf::parse("52998224725").unwrap();
        assert_eq!(serde_json::to_string(&cpf).unwrap(), "\"529.982.247-25\"");
        assert!(serde_json::from_str::<Cpf>("\"12\"").is_err());
    }
}
