// SPDX-License-Identifier: GPL-2.0

//! The art served by `/proc/drip`, one entry per output line.

pub(crate) static ART: &[&str] = &[
    r"                 .",
    r"                 |",
    r"                .'.",
    r"               /   \",
    r"              /     \",
    r"             |   o   |",
    r"             |  \_/  |",
    r"              \     /",
    r"               '---'",
    r"          ~~~~~~~~~~~~~~~~",
    r"        ~~  drip  drip  ~~",
    r"          ~~~~~~~~~~~~~~~~",
];
