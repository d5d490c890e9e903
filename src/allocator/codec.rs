use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

pub const INVALID_ADDRESS: Ipv4Addr = Ipv4Addr::BROADCAST;

// octets 1..=3 carry index + 1, big endian
pub const HOST_PART_MAX: u32 = 0xFF_FFFF;

pub const ADDRESS_SPACE: u32 = HOST_PART_MAX;

pub fn index_to_address(index: u32, subnet: u8) -> Result<Ipv4Addr> {
    let host = index.checked_add(1).ok_or(Error::AddressSpaceExhausted)?;
    if host > HOST_PART_MAX {
        return Err(Error::AddressSpaceExhausted);
    }
    let mut octets = [subnet, 0, 0, 0];
    BigEndian::write_u24(&mut octets[1..], host);
    Ok(Ipv4Addr::from(octets))
}

/// Not range checked: the caller must compare the result against the table
/// size. `x.0.0.0` decodes to `u32::MAX`, which is never a valid index.
pub fn address_to_index(address: Ipv4Addr) -> u32 {
    let octets = address.octets();
    BigEndian::read_u24(&octets[1..]).wrapping_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_index_skips_zero_tail() {
        assert_eq!(index_to_address(0, 224).unwrap(), Ipv4Addr::new(224, 0, 0, 1));
        assert_eq!(index_to_address(255, 224).unwrap(), Ipv4Addr::new(224, 0, 1, 0));
        assert_eq!(
            index_to_address(0x01_0203 - 1, 10).unwrap(),
            Ipv4Addr::new(10, 1, 2, 3)
        );
    }

    #[test]
    fn test_bijection() {
        let samples = (0..70_000u32)
            .chain((ADDRESS_SPACE - 70_000)..ADDRESS_SPACE)
            .chain([0x12_3456, 0x7F_FFFF, 0x80_0000]);
        for index in samples {
            let address = index_to_address(index, 198).unwrap();
            assert_eq!(address.octets()[0], 198);
            assert_eq!(address_to_index(address), index);
        }
    }

    #[test]
    fn test_boundary() {
        let last = ADDRESS_SPACE - 1;
        assert_eq!(
            index_to_address(last, 224).unwrap(),
            Ipv4Addr::new(224, 255, 255, 255)
        );
        assert!(matches!(
            index_to_address(last + 1, 224),
            Err(Error::AddressSpaceExhausted)
        ));
        assert!(matches!(
            index_to_address(u32::MAX, 224),
            Err(Error::AddressSpaceExhausted)
        ));
    }

    #[test]
    fn test_zero_tail_decodes_out_of_range() {
        assert_eq!(address_to_index(Ipv4Addr::new(224, 0, 0, 0)), u32::MAX);
    }
}
