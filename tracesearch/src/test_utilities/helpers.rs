#[macro_export]
macro_rules! is {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err($crate::Error::new(format!(
                "Failed == check because the value {:#?} != {:#?}",
                $left, $right
            )));
        }
    };
    ($left:expr, $right:expr, $msg:expr) => {
        if $left != $right {
            return Err($crate::Error::new(format!(
                "Failed == check because {:#?} != {:#?}: Check '{}'",
                $left, $right, $msg
            )));
        }
    };
}

#[macro_export]
macro_rules! is_not {
    ($left:expr, $right:expr) => {
        if $left == $right {
            return Err($crate::Error::new(format!(
                "Failed != check {:#?} == {:#?}",
                $left, $right
            )));
        }
    };
}

#[macro_export]
macro_rules! is_in {
    ($list:expr, $item:expr) => {
        if !$list.iter().any(|x| *x == $item) {
            return Err($crate::Error::new(format!(
                "Failed is_in check because {:#?} is not in {:#?}",
                $item, $list
            )));
        }
    };
}

#[macro_export]
macro_rules! is_empty {
    ($val:expr) => {
        if !$val.is_empty() {
            return Err($crate::Error::new(format!(
                "Failed is_empty check because it contains: {:#?}",
                $val
            )));
        }
    };
}
