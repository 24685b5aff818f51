use std::collections::BTreeMap;

/// A decoded bencode value.
///
/// Dictionaries are backed by a `BTreeMap` so that re-encoding a decoded
/// dictionary is canonical: keys come out sorted, which is what makes
/// `sha1(encode(decode(info)))` the torrent's info-hash.
#[derive(PartialEq, Debug, Clone)]
pub enum Bencode {
    BNumber(i64),
    BString(Vec<u8>),
    BList(Vec<Bencode>),
    BDict(BTreeMap<Vec<u8>, Bencode>),
}

/// Posible bencode decoding errors.
#[derive(PartialEq, Debug)]
pub enum BencodeError {
    UnexpectedEnd,
    UnexpectedByte(u8),
    InvalidNumber,
    InvalidStringLength,
    NonStringDictKey,
}

pub trait ToBencode {
    fn to_bencode(&self) -> Bencode;
}

impl ToBencode for Bencode {
    fn to_bencode(&self) -> Bencode {
        self.clone()
    }
}

impl ToBencode for String {
    fn to_bencode(&self) -> Bencode {
        Bencode::BString(self.as_bytes().to_vec())
    }
}

impl ToBencode for &str {
    fn to_bencode(&self) -> Bencode {
        Bencode::BString(self.as_bytes().to_vec())
    }
}

impl ToBencode for i64 {
    fn to_bencode(&self) -> Bencode {
        Bencode::BNumber(*self)
    }
}

impl ToBencode for u64 {
    fn to_bencode(&self) -> Bencode {
        Bencode::BNumber(*self as i64)
    }
}

impl ToBencode for u32 {
    fn to_bencode(&self) -> Bencode {
        Bencode::BNumber((*self).into())
    }
}

impl ToBencode for u16 {
    fn to_bencode(&self) -> Bencode {
        Bencode::BNumber((*self).into())
    }
}

impl ToBencode for Vec<u8> {
    fn to_bencode(&self) -> Bencode {
        Bencode::BString(self.clone())
    }
}

impl ToBencode for BTreeMap<Vec<u8>, Bencode> {
    fn to_bencode(&self) -> Bencode {
        Bencode::BDict(self.clone())
    }
}

impl<T: ToBencode> ToBencode for Vec<T> {
    fn to_bencode(&self) -> Bencode {
        Bencode::BList(self.iter().map(|v| v.to_bencode()).collect())
    }
}

impl Bencode {
    /// Decodes a bencoded byte slice into a `Bencode` value.
    ///
    /// Trailing bytes after the first complete value are ignored.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bencoder::bencode::Bencode;
    ///
    /// let bencode = Bencode::decode(b"5:hello").unwrap();
    /// assert_eq!(bencode, Bencode::BString(b"hello".to_vec()));
    ///
    /// let bencode = Bencode::decode(b"i-42e").unwrap();
    /// assert_eq!(bencode, Bencode::BNumber(-42));
    /// ```
    pub fn decode(data: &[u8]) -> Result<Bencode, BencodeError> {
        let mut decoder = Decoder { data, pos: 0 };
        decoder.decode_value()
    }

    /// Encodes any `ToBencode` value into bencoded bytes.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bencoder::bencode::Bencode;
    ///
    /// assert_eq!(Bencode::encode(&String::from("spam")), b"4:spam");
    /// assert_eq!(Bencode::encode(&123i64), b"i123e");
    /// ```
    pub fn encode(value: &dyn ToBencode) -> Vec<u8> {
        let mut out = Vec::new();
        value.to_bencode().encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Bencode::BNumber(n) => {
                out.push(b'i');
                out.extend(n.to_string().into_bytes());
                out.push(b'e');
            }
            Bencode::BString(s) => {
                out.extend(s.len().to_string().into_bytes());
                out.push(b':');
                out.extend(s);
            }
            Bencode::BList(l) => {
                out.push(b'l');
                for value in l {
                    value.encode_into(out);
                }
                out.push(b'e');
            }
            Bencode::BDict(d) => {
                out.push(b'd');
                for (key, value) in d {
                    out.extend(key.len().to_string().into_bytes());
                    out.push(b':');
                    out.extend(key);
                    value.encode_into(out);
                }
                out.push(b'e');
            }
        }
    }
}

/// Cursor over the input; every read is bounds-checked so a truncated
/// input surfaces as `UnexpectedEnd` instead of a panic.
struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Result<u8, BencodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEnd)
    }

    fn bump(&mut self) -> Result<u8, BencodeError> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    fn decode_value(&mut self) -> Result<Bencode, BencodeError> {
        match self.peek()? {
            b'i' => self.decode_number(),
            b'l' => self.decode_list(),
            b'd' => self.decode_dict(),
            b'0'..=b'9' => self.decode_string(),
            other => Err(BencodeError::UnexpectedByte(other)),
        }
    }

    fn decode_number(&mut self) -> Result<Bencode, BencodeError> {
        self.bump()?; // 'i'
        let digits = self.take_until(b'e')?;
        let number = std::str::from_utf8(digits)
            .map_err(|_| BencodeError::InvalidNumber)?
            .parse::<i64>()
            .map_err(|_| BencodeError::InvalidNumber)?;
        self.bump()?; // 'e'
        Ok(Bencode::BNumber(number))
    }

    fn decode_string(&mut self) -> Result<Bencode, BencodeError> {
        let digits = self.take_until(b':')?;
        let length = std::str::from_utf8(digits)
            .map_err(|_| BencodeError::InvalidStringLength)?
            .parse::<usize>()
            .map_err(|_| BencodeError::InvalidStringLength)?;
        self.bump()?; // ':'
        if length > self.data.len() - self.pos {
            return Err(BencodeError::UnexpectedEnd);
        }
        let string = self.data[self.pos..self.pos + length].to_vec();
        self.pos += length;
        Ok(Bencode::BString(string))
    }

    fn decode_list(&mut self) -> Result<Bencode, BencodeError> {
        self.bump()?; // 'l'
        let mut list = Vec::new();
        while self.peek()? != b'e' {
            list.push(self.decode_value()?);
        }
        self.bump()?; // 'e'
        Ok(Bencode::BList(list))
    }

    fn decode_dict(&mut self) -> Result<Bencode, BencodeError> {
        self.bump()?; // 'd'
        let mut dict = BTreeMap::new();
        while self.peek()? != b'e' {
            let key = match self.decode_value()? {
                Bencode::BString(key) => key,
                _ => return Err(BencodeError::NonStringDictKey),
            };
            let value = self.decode_value()?;
            dict.insert(key, value);
        }
        self.bump()?; // 'e'
        Ok(Bencode::BDict(dict))
    }

    fn take_until(&mut self, delimiter: u8) -> Result<&'a [u8], BencodeError> {
        let start = self.pos;
        while self.peek()? != delimiter {
            self.pos += 1;
        }
        Ok(&self.data[start..self.pos])
    }
}
