/// Overlay colors, assigned to the records of a frame in order
const MASK_PALETTE: [[u8; 3]; 6] = [
    [255, 0, 0],
    [0, 255, 0],
    [0, 0, 255],
    [255, 0, 255],
    [255, 255, 0],
    [0, 255, 255],
];

pub fn mask_color(index: usize) -> [u8; 3] {
    MASK_PALETTE[index % MASK_PALETTE.len()]
}
