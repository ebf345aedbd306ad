use ncarray_metadata::{Attributes, DataType};
use ncarray_partition::AxisRole;

use super::Variable;

/// A dimension of a [`Group`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dimension {
    /// The name.
    pub name: String,
    /// The length, or [`None`] if unlimited.
    pub length: Option<u64>,
    /// The axis role, used to split partitioned variables.
    pub axis: AxisRole,
    /// The element type of the coordinate variable, if there is one.
    pub data_type: Option<DataType>,
}

/// A group of a [`Dataset`](crate::Dataset).
///
/// The root group has an empty name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Group {
    /// The name.
    pub name: String,
    /// The dimensions, in creation order.
    pub dimensions: Vec<Dimension>,
    /// The variables, in creation order.
    pub variables: Vec<Variable>,
    /// The attributes.
    pub attributes: Attributes,
    /// The child groups.
    pub groups: Vec<Group>,
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|component| !component.is_empty())
}

impl Group {
    /// Create an empty group.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Return the descendant group at the `/` separated `path`. The empty path is this group.
    #[must_use]
    pub fn group(&self, path: &str) -> Option<&Group> {
        components(path).try_fold(self, |group, name| {
            group.groups.iter().find(|child| child.name == name)
        })
    }

    /// Return the mutable descendant group at `path`.
    #[must_use]
    pub fn group_mut(&mut self, path: &str) -> Option<&mut Group> {
        components(path).try_fold(self, |group, name| {
            group.groups.iter_mut().find(|child| child.name == name)
        })
    }

    /// Return a dimension of this group.
    #[must_use]
    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|dimension| dimension.name == name)
    }

    /// Return a mutable dimension of this group.
    #[must_use]
    pub fn dimension_mut(&mut self, name: &str) -> Option<&mut Dimension> {
        self.dimensions
            .iter_mut()
            .find(|dimension| dimension.name == name)
    }

    /// Return a variable of this group.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|variable| variable.name == name)
    }

    /// Return a mutable variable of this group.
    #[must_use]
    pub fn variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.variables
            .iter_mut()
            .find(|variable| variable.name == name)
    }

    /// Return the dimension `name` visible from the descendant group at `path`,
    /// searching that group and then its ancestors.
    #[must_use]
    pub fn find_dimension(&self, path: &str, name: &str) -> Option<&Dimension> {
        let mut path = path;
        loop {
            if let Some(dimension) = self.group(path).and_then(|group| group.dimension(name)) {
                return Some(dimension);
            }
            if path.is_empty() {
                return None;
            }
            path = path.rsplit_once('/').map_or("", |(parent, _)| parent);
        }
    }

    /// Return the mutable dimension `name` visible from the descendant group at `path`.
    #[must_use]
    pub fn find_dimension_mut(&mut self, path: &str, name: &str) -> Option<&mut Dimension> {
        let mut owner = path;
        loop {
            if self
                .group(owner)
                .is_some_and(|group| group.dimension(name).is_some())
            {
                return self.group_mut(owner)?.dimension_mut(name);
            }
            if owner.is_empty() {
                return None;
            }
            owner = owner.rsplit_once('/').map_or("", |(parent, _)| parent);
        }
    }

    /// Visit this group and its descendants depth first, with their paths.
    pub fn visit<'a>(&'a self, path: &str, visitor: &mut impl FnMut(&str, &'a Group)) {
        visitor(path, self);
        for child in &self.groups {
            let child_path = crate::array_file::join_path(path, &child.name);
            child.visit(&child_path, visitor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dimension(name: &str, length: u64) -> Dimension {
        Dimension {
            name: name.to_string(),
            length: Some(length),
            axis: AxisRole::infer(name, None),
            data_type: None,
        }
    }

    #[test]
    fn group_navigation() {
        let mut root = Group::default();
        root.dimensions.push(dimension("time", 4));
        let mut forecast = Group::new("forecast");
        forecast.dimensions.push(dimension("lat", 2));
        forecast.groups.push(Group::new("members"));
        root.groups.push(forecast);

        assert_eq!(root.group("forecast/members").unwrap().name, "members");
        assert!(root.group("forecast/missing").is_none());
        assert_eq!(
            root.find_dimension("forecast/members", "time").unwrap().axis,
            AxisRole::T
        );
        assert_eq!(
            root.find_dimension("forecast/members", "lat").unwrap().axis,
            AxisRole::Y
        );
        assert!(root.find_dimension("", "lat").is_none());

        root.find_dimension_mut("forecast/members", "lat").unwrap().axis = AxisRole::N;
        assert_eq!(root.find_dimension("forecast", "lat").unwrap().axis, AxisRole::N);

        let mut paths = Vec::new();
        root.visit("", &mut |path, _| paths.push(path.to_string()));
        assert_eq!(paths, vec!["", "forecast", "forecast/members"]);
    }
}
