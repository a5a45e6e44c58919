/// Tries to read a little-endian primitive from the cursor, capturing the position on failure.
macro_rules! try_read {
    ($cursor: ident, u8) => {
        $cursor
            .read_u8()
            .map_err(|source| $crate::err::HeaderError::Io {
                offset: $cursor.position(),
                source,
            })?
    };

    ($cursor: ident, u16) => {
        $cursor
            .read_u16::<byteorder::LittleEndian>()
            .map_err(|source| $crate::err::HeaderError::Io {
                offset: $cursor.position(),
                source,
            })?
    };

    ($cursor: ident, u32) => {
        $cursor
            .read_u32::<byteorder::LittleEndian>()
            .map_err(|source| $crate::err::HeaderError::Io {
                offset: $cursor.position(),
                source,
            })?
    };

    ($cursor: ident, [u8; $n: expr]) => {{
        let mut bytes = [0_u8; $n];
        std::io::Read::read_exact(&mut $cursor, &mut bytes).map_err(|source| {
            $crate::err::HeaderError::Io {
                offset: $cursor.position(),
                source,
            }
        })?;
        bytes
    }};
}

/// Tries to write a little-endian primitive, mapping failures to `HeaderError::Io`.
macro_rules! try_write {
    ($writer: ident, $offset: expr, u8, $value: expr) => {
        $writer
            .write_u8($value)
            .map_err(|source| $crate::err::HeaderError::Io {
                offset: $offset,
                source,
            })?
    };

    ($writer: ident, $offset: expr, u16, $value: expr) => {
        $writer
            .write_u16::<byteorder::LittleEndian>($value)
            .map_err(|source| $crate::err::HeaderError::Io {
                offset: $offset,
                source,
            })?
    };

    ($writer: ident, $offset: expr, u32, $value: expr) => {
        $writer
            .write_u32::<byteorder::LittleEndian>($value)
            .map_err(|source| $crate::err::HeaderError::Io {
                offset: $offset,
                source,
            })?
    };

    ($writer: ident, $offset: expr, bytes, $value: expr) => {
        $writer
            .write_all($value)
            .map_err(|source| $crate::err::HeaderError::Io {
                offset: $offset,
                source,
            })?
    };
}
