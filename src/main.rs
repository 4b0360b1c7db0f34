fn main() {
    xce_race_desk_lib::run()
}
