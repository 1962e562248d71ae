/*! Peptide chemistry: residue and modification formulas, sequence parsing, and theoretical
fragment ions.

Sequences use bracketed modification names following the residue they modify, e.g.
`PEPM[Oxidation]TIDEK`, with a leading bracket for the N-terminus and a trailing `-[...]`
for the C-terminus.
*/
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use chemical_elements::{ChemicalComposition, ElementSpecification, PERIODIC_TABLE};
use thiserror::Error;

/// Reasons a peptide cannot be used to produce calibration points
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PeptideError {
    #[error("The sequence is empty")]
    Empty,
    #[error("The sequence is ambiguous: {0}")]
    Ambiguous(String),
    #[error("Unknown residue '{0}'")]
    UnknownResidue(char),
    #[error("Unknown modification \"{0}\"")]
    UnknownModification(String),
    #[error("Modification \"{0}\" has a neutral loss")]
    NeutralLoss(String),
    #[error("Unbalanced brackets in \"{0}\"")]
    UnbalancedBracket(String),
    #[error("Failed to parse formula \"{0}\"")]
    InvalidFormula(String),
}

/// Element terms like `C`, `Se` or `C[13]`
fn is_element_term(term: &str) -> bool {
    let (symbol, isotope) = match term.split_once('[') {
        Some((symbol, rest)) => match rest.strip_suffix(']') {
            Some(isotope) => (symbol, Some(isotope)),
            None => return false,
        },
        None => (term, None),
    };
    let mut chars = symbol.chars();
    chars.next().is_some_and(|c| c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_lowercase())
        && isotope.map_or(true, |i| {
            (1..=3).contains(&i.len()) && i.chars().all(|c| c.is_ascii_digit())
        })
}

/// Every element symbol in a run-together formula like `C2H3NO` is in the periodic table
fn symbols_are_known(term: &str) -> bool {
    if !term.starts_with(|c: char| c.is_ascii_uppercase())
        || !term.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return false;
    }
    let mut start = None;
    for (i, c) in term.char_indices().chain([(term.len(), '0')]) {
        if c.is_ascii_lowercase() {
            continue;
        }
        if let Some(s) = start.take() {
            if PERIODIC_TABLE.get(&term[s..i]).is_none() {
                return false;
            }
        }
        if c.is_ascii_uppercase() {
            start = Some(i);
        }
    }
    true
}

/// Read a formula made of whitespace separated terms. A term is either a run-together
/// formula like `C2H3NO`, or a single element, optionally with an isotope, followed by a
/// signed count, like `C[13]6` or `H-1`. `C[13]6 C-6` describes a heavy carbon label.
pub fn parse_formula(text: &str) -> Result<ChemicalComposition<'static>, PeptideError> {
    let err = || PeptideError::InvalidFormula(text.to_string());
    let mut composition = ChemicalComposition::new();
    for term in text.split_whitespace() {
        let unsigned = term.trim_end_matches(|c: char| c.is_ascii_digit());
        let head = unsigned.strip_suffix('-').unwrap_or(unsigned);
        if is_element_term(head) {
            let count = match &term[head.len()..] {
                "" => 1,
                n => n.parse::<i32>().map_err(|_| err())?,
            };
            let element = ElementSpecification::parse(head).map_err(|_| err())?;
            if element.isotope != 0 && !element.element.isotopes.contains_key(&element.isotope) {
                return Err(err());
            }
            composition.inc(element, count);
        } else if symbols_are_known(term) {
            let group = ChemicalComposition::parse(term).map_err(|_| err())?;
            composition += &group;
        } else {
            return Err(err());
        }
    }
    if composition.is_empty() {
        return Err(err());
    }
    Ok(composition)
}

fn composition_of(counts: &[(&'static str, i32)]) -> ChemicalComposition<'static> {
    counts.iter().copied().collect()
}

const RESIDUES: [(char, &[(&'static str, i32)]); 22] = [
    ('G', &[("C", 2), ("H", 3), ("N", 1), ("O", 1)]),
    ('A', &[("C", 3), ("H", 5), ("N", 1), ("O", 1)]),
    ('S', &[("C", 3), ("H", 5), ("N", 1), ("O", 2)]),
    ('P', &[("C", 5), ("H", 7), ("N", 1), ("O", 1)]),
    ('V', &[("C", 5), ("H", 9), ("N", 1), ("O", 1)]),
    ('T', &[("C", 4), ("H", 7), ("N", 1), ("O", 2)]),
    ('C', &[("C", 3), ("H", 5), ("N", 1), ("O", 1), ("S", 1)]),
    ('L', &[("C", 6), ("H", 11), ("N", 1), ("O", 1)]),
    ('I', &[("C", 6), ("H", 11), ("N", 1), ("O", 1)]),
    ('N', &[("C", 4), ("H", 6), ("N", 2), ("O", 2)]),
    ('D', &[("C", 4), ("H", 5), ("N", 1), ("O", 3)]),
    ('Q', &[("C", 5), ("H", 8), ("N", 2), ("O", 2)]),
    ('K', &[("C", 6), ("H", 12), ("N", 2), ("O", 1)]),
    ('E', &[("C", 5), ("H", 7), ("N", 1), ("O", 3)]),
    ('M', &[("C", 5), ("H", 9), ("N", 1), ("O", 1), ("S", 1)]),
    ('H', &[("C", 6), ("H", 7), ("N", 3), ("O", 1)]),
    ('F', &[("C", 9), ("H", 9), ("N", 1), ("O", 1)]),
    ('R', &[("C", 6), ("H", 12), ("N", 4), ("O", 1)]),
    ('Y', &[("C", 9), ("H", 9), ("N", 1), ("O", 2)]),
    ('W', &[("C", 11), ("H", 10), ("N", 2), ("O", 1)]),
    ('U', &[("C", 3), ("H", 5), ("N", 1), ("O", 1), ("Se", 1)]),
    ('O', &[("C", 12), ("H", 19), ("N", 3), ("O", 2)]),
];

/// The elemental composition of an amino acid residue, as it appears within a chain
pub fn residue_composition(residue: char) -> Option<ChemicalComposition<'static>> {
    RESIDUES
        .iter()
        .find(|(c, _)| *c == residue)
        .map(|(_, counts)| composition_of(counts))
}

fn water() -> ChemicalComposition<'static> {
    composition_of(&[("H", 2), ("O", 1)])
}

/// A named chemical modification
#[derive(Debug, Clone, PartialEq)]
pub struct Modification {
    pub name: String,
    pub composition: ChemicalComposition<'static>,
    /// Masses of neutral losses this modification undergoes on fragmentation
    pub neutral_losses: Vec<f64>,
}

impl Modification {
    pub fn new(
        name: impl Into<String>,
        composition: ChemicalComposition<'static>,
        neutral_losses: Vec<f64>,
    ) -> Self {
        Self {
            name: name.into(),
            composition,
            neutral_losses,
        }
    }

    pub fn has_neutral_loss(&self) -> bool {
        self.neutral_losses.iter().any(|l| *l != 0.0)
    }
}

/// Modifications known by name. Lookups are case-insensitive.
#[derive(Debug, Clone)]
pub struct ModificationTable {
    entries: HashMap<String, Modification>,
}

impl Default for ModificationTable {
    fn default() -> Self {
        let mut this = Self::empty();
        let builtin: [(&str, &[(&'static str, i32)], &[f64]); 11] = [
            ("Carbamidomethyl", &[("C", 2), ("H", 3), ("N", 1), ("O", 1)], &[]),
            ("Oxidation", &[("O", 1)], &[]),
            ("Phospho", &[("H", 1), ("O", 3), ("P", 1)], &[97.976896]),
            ("Acetyl", &[("C", 2), ("H", 2), ("O", 1)], &[]),
            ("Deamidation", &[("H", -1), ("N", -1), ("O", 1)], &[]),
            ("Methyl", &[("C", 1), ("H", 2)], &[]),
            ("Dimethyl", &[("C", 2), ("H", 4)], &[]),
            ("Amidated", &[("H", 1), ("N", 1), ("O", -1)], &[]),
            ("Pyro-glu from Q", &[("H", -3), ("N", -1)], &[]),
            ("Pyro-glu from E", &[("H", -2), ("O", -1)], &[]),
            (
                "TMT6plex",
                &[("C", 8), ("C[13]", 4), ("H", 20), ("N", 1), ("N[15]", 1), ("O", 2)],
                &[],
            ),
        ];
        for (name, counts, losses) in builtin {
            this.insert(Modification::new(
                name,
                composition_of(counts),
                losses.to_vec(),
            ));
        }
        for (alias, target) in [
            ("Carbamidomethylation", "Carbamidomethyl"),
            ("Phosphorylation", "Phospho"),
            ("Acetylation", "Acetyl"),
            ("Methylation", "Methyl"),
            ("Dimethylation", "Dimethyl"),
            ("Amidation", "Amidated"),
        ] {
            this.alias(alias, target);
        }
        this
    }
}

impl ModificationTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, modification: Modification) {
        self.entries
            .insert(modification.name.to_lowercase(), modification);
    }

    fn alias(&mut self, alias: &str, target: &str) {
        if let Some(m) = self.entries.get(&target.to_lowercase()).cloned() {
            self.entries.insert(alias.to_lowercase(), m);
        }
    }

    /// Register a modification from a formula string, replacing any existing entry.
    /// See [`parse_formula`] for the accepted syntax.
    pub fn insert_formula(&mut self, name: &str, formula: &str) -> Result<(), PeptideError> {
        let composition = parse_formula(formula)?;
        self.insert(Modification::new(name, composition, Vec::new()));
        Ok(())
    }

    /// Resolve a modification by name. Names like `Common Variable:Oxidation on M` resolve
    /// by the part after the last `:` and before ` on `.
    pub fn get(&self, name: &str) -> Option<&Modification> {
        let key = name.trim().to_lowercase();
        if let Some(m) = self.entries.get(&key) {
            return Some(m);
        }
        let short = key.rsplit(':').next().unwrap_or(key.as_str());
        let short = match short.rfind(" on ") {
            Some(i) => &short[..i],
            None => short,
        };
        self.entries.get(short.trim())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The fragment ion series to generate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum IonKind {
    B,
    Y,
    C,
    /// z+1, the z-dot radical ion
    ZDot,
}

impl IonKind {
    pub fn is_n_terminal(&self) -> bool {
        matches!(self, Self::B | Self::C)
    }
}

impl Display for IonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IonKind::B => "b",
            IonKind::Y => "y",
            IonKind::C => "c",
            IonKind::ZDot => "zdot",
        };
        f.write_str(s)
    }
}

impl FromStr for IonKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "b" => Ok(Self::B),
            "y" => Ok(Self::Y),
            "c" => Ok(Self::C),
            "z" | "zdot" | "z." | "z+1" => Ok(Self::ZDot),
            _ => Err(format!("`{s}` is not a supported fragment ion type")),
        }
    }
}

/// A theoretical fragment ion
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub kind: IonKind,
    /// The number of residues in the fragment
    pub ordinal: usize,
    pub composition: ChemicalComposition<'static>,
    /// Monoisotopic neutral mass
    pub mass: f64,
}

impl Fragment {
    pub fn name(&self) -> String {
        format!("{}{}", self.kind, self.ordinal)
    }
}

/// A peptide whose residues and modifications are all resolved to compositions
#[derive(Debug, Clone, PartialEq)]
pub struct PeptideSequence {
    residues: Vec<ChemicalComposition<'static>>,
    sequence: String,
    n_term: ChemicalComposition<'static>,
    c_term: ChemicalComposition<'static>,
}

impl PeptideSequence {
    /// Parse a modified sequence, resolving modification names against `table`.
    ///
    /// Fails for sequences carrying unknown modifications or modifications with neutral
    /// losses, since those cannot be assigned unambiguous fragment formulas.
    pub fn parse(text: &str, table: &ModificationTable) -> Result<Self, PeptideError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PeptideError::Empty);
        }
        if text.contains('|') {
            return Err(PeptideError::Ambiguous(text.to_string()));
        }

        let mut residues: Vec<ChemicalComposition<'static>> = Vec::new();
        let mut sequence = String::new();
        let mut n_term = ChemicalComposition::new();
        let mut c_term = ChemicalComposition::new();

        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '[' => {
                    let mut depth = 1;
                    let mut name = String::new();
                    for c in chars.by_ref() {
                        match c {
                            '[' => depth += 1,
                            ']' => depth -= 1,
                            _ => {}
                        }
                        if depth == 0 {
                            break;
                        }
                        name.push(c);
                    }
                    if depth != 0 {
                        return Err(PeptideError::UnbalancedBracket(text.to_string()));
                    }
                    let modification = table
                        .get(&name)
                        .ok_or_else(|| PeptideError::UnknownModification(name.clone()))?;
                    if modification.has_neutral_loss() {
                        return Err(PeptideError::NeutralLoss(modification.name.clone()));
                    }
                    match residues.last_mut() {
                        Some(last) => *last += &modification.composition,
                        None => n_term += &modification.composition,
                    }
                }
                '-' if chars.peek() == Some(&'[') && !residues.is_empty() => {
                    chars.next();
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(PeptideError::UnbalancedBracket(text.to_string()));
                    }
                    let modification = table
                        .get(&name)
                        .ok_or_else(|| PeptideError::UnknownModification(name.clone()))?;
                    if modification.has_neutral_loss() {
                        return Err(PeptideError::NeutralLoss(modification.name.clone()));
                    }
                    c_term += &modification.composition;
                }
                ']' => return Err(PeptideError::UnbalancedBracket(text.to_string())),
                c => {
                    let residue =
                        residue_composition(c).ok_or(PeptideError::UnknownResidue(c))?;
                    residues.push(residue);
                    sequence.push(c);
                }
            }
        }

        if residues.is_empty() {
            return Err(PeptideError::Empty);
        }

        Ok(Self {
            residues,
            sequence,
            n_term,
            c_term,
        })
    }

    /// The unmodified residue letters
    pub fn base_sequence(&self) -> &str {
        &self.sequence
    }

    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    /// The elemental composition of the intact neutral peptide
    pub fn composition(&self) -> ChemicalComposition<'static> {
        let mut composition = self.n_term.clone();
        for r in self.residues.iter() {
            composition += r;
        }
        composition += &self.c_term;
        composition += &water();
        composition
    }

    pub fn monoisotopic_mass(&self) -> f64 {
        self.composition().mass()
    }

    /// Enumerate the theoretical fragments of the given kinds, in kind order and then
    /// ordinal order.
    pub fn fragments(&self, kinds: &[IonKind]) -> Vec<Fragment> {
        let n = self.residues.len();
        let mut fragments = Vec::with_capacity(kinds.len() * n.saturating_sub(1));
        let nh3 = composition_of(&[("N", 1), ("H", 3)]);
        let nh2 = composition_of(&[("N", 1), ("H", 2)]);
        for kind in kinds {
            let mut acc = if kind.is_n_terminal() {
                self.n_term.clone()
            } else {
                &self.c_term + &water()
            };
            for ordinal in 1..n {
                let residue = if kind.is_n_terminal() {
                    &self.residues[ordinal - 1]
                } else {
                    &self.residues[n - ordinal]
                };
                acc += residue;
                let composition = match kind {
                    IonKind::C => &acc + &nh3,
                    IonKind::ZDot => &acc - &nh2,
                    IonKind::B | IonKind::Y => acc.clone(),
                };
                let mass = composition.mass();
                fragments.push(Fragment {
                    kind: *kind,
                    ordinal,
                    composition,
                    mass,
                });
            }
        }
        fragments
    }
}
