//! Bit-table permutation.
//!
//! Every DES stage (IP, IP⁻¹, E, P, PC1, PC2) is a table of 1-based bit
//! positions counted from the most significant bit of the input. The output
//! has one bit per table entry, so the same routine reorders (IP, P), expands
//! (E) and contracts (PC1, PC2) a bit vector.

/// Applies `table` to the low `input_width` bits of `input`.
///
/// Entry `i` of the table names the input bit that becomes output bit `i`,
/// where position 1 is the most significant of the `input_width` bits. The
/// result is right-aligned and `table.len()` bits wide.
pub fn permute(input: u64, input_width: u32, table: &[u8]) -> u64 {
    debug_assert!(input_width <= 64);
    debug_assert!(table.len() <= 64);

    table.iter().fold(0u64, |acc, &position| {
        debug_assert!(position >= 1 && u32::from(position) <= input_width);
        let bit = (input >> (input_width - u32::from(position))) & 1;
        (acc << 1) | bit
    })
}

/// Rotates the low 28 bits of `half` left by `shift`.
pub fn rotate_left_28(half: u32, shift: u32) -> u32 {
    const MASK: u32 = 0x0FFF_FFFF;
    let half = half & MASK;
    ((half << shift) | (half >> (28 - shift))) & MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_table() {
        let table: Vec<u8> = (1..=8).collect();
        assert_eq!(permute(0b1011_0010, 8, &table), 0b1011_0010);
    }

    #[test]
    fn test_reverse_table() {
        let table: Vec<u8> = (1..=8).rev().collect();
        assert_eq!(permute(0b1000_0000, 8, &table), 0b0000_0001);
        assert_eq!(permute(0b1100_1010, 8, &table), 0b0101_0011);
    }

    #[test]
    fn test_expansion_repeats_bits() {
        // 4 bits -> 6 bits, first and last bit duplicated
        let table = [4, 1, 2, 3, 4, 1];
        assert_eq!(permute(0b1001, 4, &table), 0b110011);
    }

    #[test]
    fn test_contraction_drops_bits() {
        let table = [1, 3];
        assert_eq!(permute(0b101, 3, &table), 0b11);
        assert_eq!(permute(0b010, 3, &table), 0b00);
    }

    #[test]
    fn test_full_width_input() {
        let table: Vec<u8> = (1..=64).collect();
        assert_eq!(permute(u64::MAX, 64, &table), u64::MAX);
        assert_eq!(permute(1 << 63, 64, &[1]), 1);
    }

    #[test]
    fn test_rotate_left_28() {
        assert_eq!(rotate_left_28(0x0800_0000, 1), 0x0000_0001);
        assert_eq!(rotate_left_28(0x0C00_0000, 2), 0x0000_0003);
        assert_eq!(rotate_left_28(0x0000_0001, 2), 0x0000_0004);
        // Bits above 28 are ignored
        assert_eq!(rotate_left_28(0xF000_0001, 1), 0x0000_0002);
    }
}
