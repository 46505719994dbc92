//! Occupancy-rate model
//!
//! A module (e.g. "Cultivation carts") is made of groups of units, each
//! unit owning a fixed number of slots filled with elements (a planted
//! item, or nothing). Units live in an arena keyed by [`UnitId`]; groups
//! only hold ids, so removing or moving a unit never invalidates another
//! unit's identity.
//!
//! Every mutation validates all indices before touching anything, so an
//! error always leaves the module unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub type UnitId = u64;

/// Modules created at startup when missing
pub const DEFAULT_MODULES: [&str; 3] = ["Aquaponic greenhouse", "Cultivation carts", "Farmbot"];

/// Largest slot count of a unit
pub const MAX_SLOTS: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OccupancyError {
    #[error("Group index {index} is out of range ({len} groups for the module)")]
    GroupOutOfRange { index: usize, len: usize },

    #[error("Group index {index} is out of range ({len} groups for the module)")]
    SourceGroupOutOfRange { index: usize, len: usize },

    #[error("Group index {index} is out of range ({len} groups for the module)")]
    DestinationGroupOutOfRange { index: usize, len: usize },

    #[error("Group index {group} has only {len} units, you are trying to get out of range unit id {index}")]
    UnitOutOfRange { group: usize, index: usize, len: usize },

    #[error("Unit has only {len} elements, you are trying to get out of range element id {index}")]
    ElementOutOfRange { index: usize, len: usize },

    #[error("There are {occupied} non empty elements, please remove their value before removing slots")]
    NotEnoughSlots { occupied: usize, slots: u32 },

    #[error("There are {occupied} non empty elements, please remove their value before removing the unit")]
    UnitNotEmpty { occupied: usize },

    #[error("Invalid value for slots: {slots} (at most {max})", max = MAX_SLOTS)]
    TooManySlots { slots: u32 },
}

impl OccupancyError {
    /// Stable error tag exposed to clients
    pub fn tag(&self) -> &'static str {
        match self {
            OccupancyError::GroupOutOfRange { .. } => "Group out of range",
            OccupancyError::SourceGroupOutOfRange { .. } => "Source group out of range",
            OccupancyError::DestinationGroupOutOfRange { .. } => "Destination group out of range",
            OccupancyError::UnitOutOfRange { .. } => "Unit out of range",
            OccupancyError::ElementOutOfRange { .. } => "Element out of range",
            OccupancyError::NotEnoughSlots { .. } => "Not enough slots for the current elements",
            OccupancyError::UnitNotEmpty { .. } => "No empty elements remaining",
            OccupancyError::TooManySlots { .. } => "Invalid argument",
        }
    }

    /// Index errors, as opposed to rejected mutations
    pub fn is_out_of_range(&self) -> bool {
        !matches!(
            self,
            OccupancyError::NotEnoughSlots { .. }
                | OccupancyError::UnitNotEmpty { .. }
                | OccupancyError::TooManySlots { .. }
        )
    }
}

pub type OccupancyResult<T> = Result<T, OccupancyError>;

fn check_slots(slots: u32) -> OccupancyResult<()> {
    if slots > MAX_SLOTS {
        return Err(OccupancyError::TooManySlots { slots });
    }
    Ok(())
}

/// A slot content; `value == None` means the slot is empty
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub value: Option<String>,
    pub comment: Option<String>,
}

impl Element {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Empty strings are stored as `None`
    pub fn new(value: Option<String>, comment: Option<String>) -> Self {
        Self {
            value: value.filter(|v| !v.is_empty()),
            comment: comment.filter(|c| !c.is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }
}

/// Occupancy rate at a given time, in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    pub date: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub name: String,
    pub slots: u32,
    pub elements: Vec<Element>,
    /// History of computed rates, oldest first
    pub rates: Vec<Rate>,
}

impl Unit {
    /// New unit with every slot empty
    pub fn new(id: UnitId, name: impl Into<String>, slots: u32) -> Self {
        let mut unit = Self {
            id,
            name: name.into(),
            slots,
            elements: Vec::with_capacity(slots as usize),
            rates: Vec::new(),
        };
        unit.fill();
        unit
    }

    /// Pad the elements with empty ones up to the slot count
    pub fn fill(&mut self) {
        let slots = self.slots as usize;
        if self.elements.len() < slots {
            self.elements.resize_with(slots, Element::empty);
        }
    }

    /// Whether the elements fit in the slots
    pub fn validate_slots(&self) -> bool {
        self.elements.len() <= self.slots as usize
    }

    /// Number of non-empty elements
    pub fn occupied(&self) -> usize {
        self.elements.iter().filter(|e| !e.is_empty()).count()
    }

    pub fn current_rate(&self) -> f64 {
        if self.slots == 0 {
            return 0.0;
        }
        self.occupied() as f64 / f64::from(self.slots)
    }

    /// Compute the current rate and append it to the history
    pub fn compute_rate(&mut self, at: DateTime<Utc>) -> Rate {
        let rate = Rate {
            date: at,
            value: self.current_rate(),
        };
        self.rates.push(rate);
        rate
    }

    /// Change the slot count, keeping only the non-empty elements
    pub fn resize(&mut self, slots: u32) -> OccupancyResult<()> {
        check_slots(slots)?;
        let occupied = self.occupied();
        if occupied > slots as usize {
            return Err(OccupancyError::NotEnoughSlots { occupied, slots });
        }
        self.elements.retain(|e| !e.is_empty());
        self.slots = slots;
        self.fill();
        Ok(())
    }
}

/// Rate computed for one unit, with its position at computation time
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UnitRate {
    pub group: usize,
    pub unit: usize,
    pub rate: Rate,
}

/// Occupancy-rate module document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyModule {
    pub name: String,
    /// Store revision, maintained by the persistence layer
    #[serde(skip)]
    pub version: i64,
    next_unit_id: UnitId,
    units: BTreeMap<UnitId, Unit>,
    groups: Vec<Vec<UnitId>>,
}

/// Client view: `units` is the jagged group/unit array
#[derive(Debug, Serialize)]
pub struct ModuleView<'a> {
    pub name: &'a str,
    pub version: i64,
    pub units: Vec<Vec<&'a Unit>>,
}

impl OccupancyModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 0,
            next_unit_id: 0,
            units: BTreeMap::new(),
            groups: Vec::new(),
        }
    }

    pub fn view(&self) -> ModuleView<'_> {
        ModuleView {
            name: &self.name,
            version: self.version,
            units: self
                .groups
                .iter()
                .map(|group| group.iter().filter_map(|id| self.units.get(id)).collect())
                .collect(),
        }
    }

    /// Number of groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Units of a group, in order
    pub fn group(&self, group: usize) -> Option<Vec<&Unit>> {
        self.groups
            .get(group)
            .map(|ids| ids.iter().filter_map(|id| self.units.get(id)).collect())
    }

    /// All units, group by group
    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.groups
            .iter()
            .flatten()
            .filter_map(move |id| self.units.get(id))
    }

    pub fn unit(&self, group: usize, unit: usize) -> OccupancyResult<&Unit> {
        let id = self.unit_id(group, unit)?;
        self.units
            .get(&id)
            .ok_or(OccupancyError::UnitOutOfRange {
                group,
                index: unit,
                len: self.groups[group].len(),
            })
    }

    fn unit_id(&self, group: usize, unit: usize) -> OccupancyResult<UnitId> {
        let ids = self.groups.get(group).ok_or(OccupancyError::GroupOutOfRange {
            index: group,
            len: self.groups.len(),
        })?;
        ids.get(unit)
            .copied()
            .ok_or(OccupancyError::UnitOutOfRange {
                group,
                index: unit,
                len: ids.len(),
            })
    }

    fn unit_mut(&mut self, group: usize, unit: usize) -> OccupancyResult<&mut Unit> {
        let id = self.unit_id(group, unit)?;
        let len = self.groups[group].len();
        self.units.get_mut(&id).ok_or(OccupancyError::UnitOutOfRange {
            group,
            index: unit,
            len,
        })
    }

    /// Add a new empty unit, into an existing group or as a new group
    pub fn add_unit(
        &mut self,
        name: impl Into<String>,
        slots: u32,
        group: Option<usize>,
    ) -> OccupancyResult<UnitId> {
        check_slots(slots)?;
        if let Some(index) = group {
            if index >= self.groups.len() {
                return Err(OccupancyError::GroupOutOfRange {
                    index,
                    len: self.groups.len(),
                });
            }
        }

        let id = self.next_unit_id;
        self.next_unit_id += 1;
        self.units.insert(id, Unit::new(id, name, slots));

        match group {
            Some(index) => self.groups[index].push(id),
            None => self.groups.push(vec![id]),
        }
        Ok(id)
    }

    /// Move a unit to the end of another group
    pub fn move_unit(&mut self, group: usize, unit: usize, to: usize) -> OccupancyResult<()> {
        let len = self.groups.len();
        let source = self
            .groups
            .get(group)
            .ok_or(OccupancyError::SourceGroupOutOfRange { index: group, len })?;
        if unit >= source.len() {
            return Err(OccupancyError::UnitOutOfRange {
                group,
                index: unit,
                len: source.len(),
            });
        }
        if to >= len {
            return Err(OccupancyError::DestinationGroupOutOfRange { index: to, len });
        }

        let id = self.groups[group].remove(unit);
        self.groups[to].push(id);
        Ok(())
    }

    /// Change the slot count of a unit
    pub fn resize_unit(&mut self, group: usize, unit: usize, slots: u32) -> OccupancyResult<()> {
        self.unit_mut(group, unit)?.resize(slots)
    }

    /// Remove a unit whose elements are all empty
    pub fn remove_unit(&mut self, group: usize, unit: usize) -> OccupancyResult<Unit> {
        let id = self.unit_id(group, unit)?;
        let occupied = self.units.get(&id).map(Unit::occupied).unwrap_or(0);
        if occupied > 0 {
            return Err(OccupancyError::UnitNotEmpty { occupied });
        }

        let removed = self
            .units
            .remove(&id)
            .ok_or(OccupancyError::UnitOutOfRange {
                group,
                index: unit,
                len: self.groups[group].len(),
            })?;
        self.groups[group].remove(unit);
        Ok(removed)
    }

    /// Replace the value and comment of one element
    pub fn edit_element(
        &mut self,
        group: usize,
        unit: usize,
        element: usize,
        value: Option<String>,
        comment: Option<String>,
    ) -> OccupancyResult<()> {
        let target = self.unit_mut(group, unit)?;
        let len = target.elements.len();
        let slot = target
            .elements
            .get_mut(element)
            .ok_or(OccupancyError::ElementOutOfRange {
                index: element,
                len,
            })?;
        *slot = Element::new(value, comment);
        Ok(())
    }

    /// Compute and record the rate of every unit of every group
    pub fn compute_rates(&mut self, at: DateTime<Utc>) -> Vec<UnitRate> {
        let mut rates = Vec::new();
        for (g, ids) in self.groups.iter().enumerate() {
            for (u, id) in ids.iter().enumerate() {
                if let Some(unit) = self.units.get_mut(id) {
                    rates.push(UnitRate {
                        group: g,
                        unit: u,
                        rate: unit.compute_rate(at),
                    });
                }
            }
        }
        rates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn unit_with(values: &[Option<&str>], slots: u32) -> Unit {
        Unit {
            id: 0,
            name: "cart".into(),
            slots,
            elements: values
                .iter()
                .map(|v| Element::new(v.map(str::to_string), None))
                .collect(),
            rates: Vec::new(),
        }
    }

    #[test]
    fn test_fill_pads_to_slots() {
        let mut unit = unit_with(&[Some("basil")], 4);
        unit.fill();

        assert_eq!(unit.elements.len(), 4);
        assert!(unit.validate_slots());
        assert_eq!(unit.elements[0].value.as_deref(), Some("basil"));
        assert!(unit.elements[1..].iter().all(Element::is_empty));
    }

    #[test]
    fn test_validate_slots() {
        assert!(unit_with(&[None, None], 2).validate_slots());
        assert!(!unit_with(&[None, None, None], 2).validate_slots());
    }

    #[test]
    fn test_compute_rate_half_occupied() {
        let mut unit = unit_with(&[None, Some("a"), None, Some("b")], 4);
        let rate = unit.compute_rate(at());

        assert_eq!(rate.value, 0.5);
        assert_eq!(unit.rates.len(), 1);
        assert_eq!(unit.rates[0].date, at());
    }

    #[test]
    fn test_resize_rejected_without_partial_mutation() {
        let mut module = OccupancyModule::new("Cultivation carts");
        module.add_unit("cart", 5, None).unwrap();
        module
            .edit_element(0, 0, 1, Some("leek".into()), None)
            .unwrap();
        module
            .edit_element(0, 0, 3, Some("kale".into()), None)
            .unwrap();
        let before = module.clone();

        let err = module.resize_unit(0, 0, 1).unwrap_err();

        assert_eq!(
            err,
            OccupancyError::NotEnoughSlots {
                occupied: 2,
                slots: 1
            }
        );
        assert_eq!(err.tag(), "Not enough slots for the current elements");
        assert_eq!(module, before);
    }

    #[test]
    fn test_resize_compacts_and_refills() {
        let mut module = OccupancyModule::new("Cultivation carts");
        module.add_unit("cart", 5, None).unwrap();
        module
            .edit_element(0, 0, 4, Some("leek".into()), None)
            .unwrap();

        module.resize_unit(0, 0, 3).unwrap();

        let unit = module.unit(0, 0).unwrap();
        assert_eq!(unit.slots, 3);
        assert_eq!(unit.elements.len(), 3);
        assert_eq!(unit.elements[0].value.as_deref(), Some("leek"));
    }

    #[test]
    fn test_remove_requires_empty_unit() {
        let mut module = OccupancyModule::new("Farmbot");
        module.add_unit("bed", 2, None).unwrap();
        module.edit_element(0, 0, 0, Some("carrot".into()), None).unwrap();

        let err = module.remove_unit(0, 0).unwrap_err();
        assert_eq!(err, OccupancyError::UnitNotEmpty { occupied: 1 });
        assert_eq!(module.group(0).unwrap().len(), 1);

        module.edit_element(0, 0, 0, Some(String::new()), None).unwrap();
        module.remove_unit(0, 0).unwrap();
        assert_eq!(module.group(0).unwrap().len(), 0);
    }

    #[test]
    fn test_remove_keeps_other_unit_ids() {
        let mut module = OccupancyModule::new("Farmbot");
        let first = module.add_unit("a", 1, None).unwrap();
        let second = module.add_unit("b", 1, Some(0)).unwrap();

        module.remove_unit(0, 0).unwrap();

        let remaining = module.unit(0, 0).unwrap();
        assert_eq!(remaining.id, second);
        assert_ne!(remaining.id, first);
        // Fresh ids are never reused
        let third = module.add_unit("c", 1, Some(0)).unwrap();
        assert!(third > second);
    }

    #[test]
    fn test_add_unit_into_missing_group() {
        let mut module = OccupancyModule::new("Farmbot");
        let err = module.add_unit("bed", 3, Some(0)).unwrap_err();

        assert_eq!(err, OccupancyError::GroupOutOfRange { index: 0, len: 0 });
        assert_eq!(module.group_count(), 0);
    }

    #[test]
    fn test_slot_count_is_bounded() {
        let mut module = OccupancyModule::new("Farmbot");
        let err = module.add_unit("cart", u32::MAX, None).unwrap_err();
        assert_eq!(err, OccupancyError::TooManySlots { slots: u32::MAX });
        assert_eq!(err.tag(), "Invalid argument");
        assert_eq!(module.group_count(), 0);

        module.add_unit("cart", MAX_SLOTS, None).unwrap();
        let before = module.clone();
        assert_eq!(
            module.resize_unit(0, 0, MAX_SLOTS + 1),
            Err(OccupancyError::TooManySlots {
                slots: MAX_SLOTS + 1
            })
        );
        assert_eq!(module, before);
    }

    #[test]
    fn test_add_unit_into_first_group() {
        let mut module = OccupancyModule::new("Farmbot");
        module.add_unit("bed", 3, None).unwrap();
        module.add_unit("tower", 6, Some(0)).unwrap();

        assert_eq!(module.group_count(), 1);
        let group = module.group(0).unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group[1].elements.len(), 6);
    }

    #[test]
    fn test_move_unit_bounds() {
        let mut module = OccupancyModule::new("Aquaponic greenhouse");
        module.add_unit("a", 1, None).unwrap();
        module.add_unit("b", 1, None).unwrap();

        assert_eq!(
            module.move_unit(2, 0, 0),
            Err(OccupancyError::SourceGroupOutOfRange { index: 2, len: 2 })
        );
        assert_eq!(
            module.move_unit(0, 1, 1),
            Err(OccupancyError::UnitOutOfRange {
                group: 0,
                index: 1,
                len: 1
            })
        );
        assert_eq!(
            module.move_unit(0, 0, 2),
            Err(OccupancyError::DestinationGroupOutOfRange { index: 2, len: 2 })
        );

        module.move_unit(0, 0, 1).unwrap();
        assert!(module.group(0).unwrap().is_empty());
        let names: Vec<_> = module
            .group(1)
            .unwrap()
            .iter()
            .map(|u| u.name.as_str())
            .collect();
        assert_eq!(names, ["b", "a"]);
    }

    #[test]
    fn test_edit_element_out_of_range() {
        let mut module = OccupancyModule::new("Farmbot");
        module.add_unit("bed", 2, None).unwrap();

        let err = module
            .edit_element(0, 0, 2, Some("radish".into()), None)
            .unwrap_err();
        assert_eq!(err.tag(), "Element out of range");
        assert!(err.is_out_of_range());
    }

    #[test]
    fn test_compute_rates_over_groups() {
        let mut module = OccupancyModule::new("Cultivation carts");
        module.add_unit("a", 2, None).unwrap();
        module.add_unit("b", 4, None).unwrap();
        module.edit_element(1, 0, 0, Some("mint".into()), None).unwrap();

        let rates = module.compute_rates(at());

        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].rate.value, 0.0);
        assert_eq!((rates[1].group, rates[1].unit), (1, 0));
        assert_eq!(rates[1].rate.value, 0.25);
        assert!(module.units().all(|u| u.rates.len() == 1));
    }

    #[test]
    fn test_view_of_new_module() {
        let module = OccupancyModule::new("Farmbot");
        let json = serde_json::to_value(module.view()).unwrap();

        assert_eq!(json["name"], "Farmbot");
        assert_eq!(json["units"], serde_json::json!([]));
    }

    #[test]
    fn test_document_keeps_arena_layout() {
        let mut module = OccupancyModule::new("Farmbot");
        module.add_unit("a", 1, None).unwrap();
        module.add_unit("b", 2, Some(0)).unwrap();
        module.remove_unit(0, 0).unwrap();

        let stored = serde_json::to_string(&module).unwrap();
        let restored: OccupancyModule = serde_json::from_str(&stored).unwrap();

        assert_eq!(restored, module);
        assert_eq!(restored.unit(0, 0).unwrap().id, 1);
    }
}
